//! Names of extracted images.
//!
//! Extracted images carry their site position in the file name, built from
//! a template such as `{plate}_{well}_y{y:03}_x{x:03}_{channel}.png`.
//! Fields are `plate`, `well`, `y`, `x` and `channel`, each exactly once;
//! numeric fields accept a zero-padded width (`:03`). Two fields must be
//! separated by literal text so names can be parsed back.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Site and channel identity of one extracted image.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageName {
    pub plate: String,
    pub well: String,
    pub site_y: u32,
    pub site_x: u32,
    pub channel: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Plate,
    Well,
    Y,
    X,
    Channel,
}

impl Field {
    const ALL: [Self; 5] = [Self::Plate, Self::Well, Self::Y, Self::X, Self::Channel];

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "plate" => Some(Self::Plate),
            "well" => Some(Self::Well),
            "y" => Some(Self::Y),
            "x" => Some(Self::X),
            "channel" => Some(Self::Channel),
            _ => None,
        }
    }

    const fn is_numeric(self) -> bool {
        matches!(self, Self::Y | Self::X)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Field { field: Field, width: usize },
}

/// A parsed image name template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate {
    tokens: Vec<Token>,
}

impl NameTemplate {
    /// Parse a template.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidTemplate`] for unbalanced braces, unknown
    /// or repeated fields, missing fields, a width on a text field, or two
    /// adjacent fields.
    pub fn parse(template: &str) -> Result<Self, JobError> {
        let invalid = |reason: String| JobError::InvalidTemplate {
            template: template.to_string(),
            reason,
        };

        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();
        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut spec = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        spec.push(c);
                    }
                    if !closed {
                        return Err(invalid("unclosed \"{\"".to_string()));
                    }
                    let (name, width) = match spec.split_once(':') {
                        Some((name, width)) => {
                            let width = width
                                .parse::<usize>()
                                .map_err(|_| invalid(format!("bad width \"{width}\"")))?;
                            (name, width)
                        }
                        None => (spec.as_str(), 0),
                    };
                    let field = Field::from_name(name)
                        .ok_or_else(|| invalid(format!("unknown field \"{name}\"")))?;
                    if width > 0 && !field.is_numeric() {
                        return Err(invalid(format!("field \"{name}\" cannot be padded")));
                    }
                    if literal.is_empty() {
                        if matches!(tokens.last(), Some(Token::Field { .. })) {
                            return Err(invalid(format!(
                                "field \"{name}\" directly follows another field"
                            )));
                        }
                    } else {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    if tokens
                        .iter()
                        .any(|t| matches!(t, Token::Field { field: f, .. } if *f == field))
                    {
                        return Err(invalid(format!("field \"{name}\" is repeated")));
                    }
                    tokens.push(Token::Field { field, width });
                }
                '}' => return Err(invalid("unmatched \"}\"".to_string())),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        for field in Field::ALL {
            if !tokens
                .iter()
                .any(|t| matches!(t, Token::Field { field: f, .. } if *f == field))
            {
                return Err(invalid(format!("field {field:?} is missing")));
            }
        }
        Ok(Self { tokens })
    }

    /// Render the file name of an image.
    #[must_use]
    pub fn format(&self, name: &ImageName) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Field { field, width } => {
                    let _ = match field {
                        Field::Plate => write!(out, "{}", name.plate),
                        Field::Well => write!(out, "{}", name.well),
                        Field::Y => write!(out, "{:0width$}", name.site_y),
                        Field::X => write!(out, "{:0width$}", name.site_x),
                        Field::Channel => write!(out, "{}", name.channel),
                    };
                }
            }
        }
        out
    }

    /// Recover the image identity from a file name, or `None` if the name
    /// does not follow the template.
    #[must_use]
    pub fn parse_name(&self, file_name: &str) -> Option<ImageName> {
        let mut rest = file_name;
        let mut name = ImageName {
            plate: String::new(),
            well: String::new(),
            site_y: 0,
            site_x: 0,
            channel: String::new(),
        };
        for (i, token) in self.tokens.iter().enumerate() {
            match token {
                Token::Literal(text) => rest = rest.strip_prefix(text.as_str())?,
                Token::Field { field, .. } => {
                    let end = if field.is_numeric() {
                        rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len())
                    } else {
                        match self.tokens.get(i + 1) {
                            Some(Token::Literal(next)) => rest.find(next.as_str())?,
                            _ => rest.len(),
                        }
                    };
                    let (value, tail) = rest.split_at(end);
                    if value.is_empty() {
                        return None;
                    }
                    match field {
                        Field::Plate => name.plate = value.to_string(),
                        Field::Well => name.well = value.to_string(),
                        Field::Y => name.site_y = value.parse().ok()?,
                        Field::X => name.site_x = value.parse().ok()?,
                        Field::Channel => name.channel = value.to_string(),
                    }
                    rest = tail;
                }
            }
        }
        rest.is_empty().then_some(name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::experiment::ExperimentConfig;

    fn default_template() -> NameTemplate {
        NameTemplate::parse(ExperimentConfig::DEFAULT_IMAGE_FILE_FORMAT).unwrap()
    }

    fn sample() -> ImageName {
        ImageName {
            plate: "P1".into(),
            well: "B03".into(),
            site_y: 2,
            site_x: 11,
            channel: "dapi".into(),
        }
    }

    #[test]
    fn default_template_pads_site_coordinates() {
        assert_eq!(
            default_template().format(&sample()),
            "P1_B03_y002_x011_dapi.png"
        );
    }

    #[test]
    fn names_parse_back_to_their_identity() {
        let template = default_template();
        assert_eq!(
            template.parse_name("P1_B03_y002_x011_dapi.png"),
            Some(sample())
        );
    }

    #[test]
    fn foreign_names_do_not_parse() {
        let template = default_template();
        assert_eq!(template.parse_name("P1_B03_y002_x011_dapi.tif"), None);
        assert_eq!(template.parse_name("P1_B03_yAB_x011_dapi.png"), None);
        assert_eq!(template.parse_name("notes.txt"), None);
    }

    #[test]
    fn malformed_templates_are_rejected() {
        for template in [
            "{plate}_{well}_{y}_{x}",
            "{plate}_{well}_{y}_{x}_{channel}_{plate}",
            "{plate}_{well}{y}_{x}_{channel}",
            "{plate:03}_{well}_{y}_{x}_{channel}",
            "{plate}_{well}_{y}_{x}_{channel",
            "{plate}_{well}_{y}_{x}_{color}",
        ] {
            assert!(
                matches!(
                    NameTemplate::parse(template),
                    Err(JobError::InvalidTemplate { .. })
                ),
                "{template} should be rejected"
            );
        }
    }
}
