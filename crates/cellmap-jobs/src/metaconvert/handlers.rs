//! Microscope-specific readers of uploaded image file names.
//!
//! Each microscope names its output files differently. A handler turns
//! one uploaded file name into a [`RawImage`]: plate, well, site and
//! channel, with the site given either as a grid position or as the
//! microscope's running field number.

use std::path::{Path, PathBuf};

use crate::error::JobError;
use crate::filename::NameTemplate;

/// Position of a site within its well, as far as the file name tells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SiteIndex {
    /// Row and column in the acquisition grid.
    Grid { y: u32, x: u32 },
    /// Acquisition order; the grid is derived later.
    Sequence(u32),
}

/// What a handler reads from one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub file: PathBuf,
    pub plate: String,
    pub well: String,
    pub site: SiteIndex,
    pub channel: String,
}

/// Supported metadata handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataFormat {
    /// Files already follow the experiment's image name template.
    Default,
    /// Yokogawa CellVoyager:
    /// `<plate>_<well>_T<t>F<field>L<l>A<a>Z<z>C<channel>.<ext>`.
    Cellvoyager,
    /// Molecular Devices MetaMorph: `<plate>_<well>_s<site>_w<channel>.<ext>`.
    Metamorph,
}

impl MetadataFormat {
    /// All handler names.
    pub const NAMES: [&str; 3] = ["default", "cellvoyager", "metamorph"];

    /// Select a handler by name.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnsupportedFormat`] for unknown names.
    pub fn from_name(name: &str) -> Result<Self, JobError> {
        match name {
            "default" => Ok(Self::Default),
            "cellvoyager" => Ok(Self::Cellvoyager),
            "metamorph" => Ok(Self::Metamorph),
            _ => Err(JobError::UnsupportedFormat {
                format: name.to_string(),
                supported: Self::NAMES.to_vec(),
            }),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Cellvoyager => "cellvoyager",
            Self::Metamorph => "metamorph",
        }
    }

    /// Read one uploaded file name, or `None` if it does not follow the
    /// format's naming convention.
    #[must_use]
    pub fn read(self, file: &Path, template: &NameTemplate) -> Option<RawImage> {
        let file_name = file.file_name()?.to_str()?;
        match self {
            Self::Default => {
                let name = template.parse_name(file_name)?;
                Some(RawImage {
                    file: file.to_path_buf(),
                    plate: name.plate,
                    well: name.well,
                    site: SiteIndex::Grid {
                        y: name.site_y,
                        x: name.site_x,
                    },
                    channel: name.channel,
                })
            }
            Self::Cellvoyager => read_cellvoyager(file, file_name),
            Self::Metamorph => read_metamorph(file, file_name),
        }
    }
}

/// `<plate>_<well>` followed by `_<code>` and an extension.
fn split_plate_well(file_name: &str) -> Option<(&str, &str, &str)> {
    let (stem, _extension) = file_name.rsplit_once('.')?;
    let (prefix, code) = stem.rsplit_once('_')?;
    let (plate, well) = prefix.rsplit_once('_')?;
    (!plate.is_empty() && !well.is_empty()).then_some((plate, well, code))
}

/// Leading ASCII digits of `text` and the remainder.
fn digits(text: &str) -> Option<(u32, &str)> {
    let end = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let value = text[..end].parse().ok()?;
    Some((value, &text[end..]))
}

fn read_cellvoyager(file: &Path, file_name: &str) -> Option<RawImage> {
    let (plate, well, code) = split_plate_well(file_name)?;
    let (_timepoint, rest) = digits(code.strip_prefix('T')?)?;
    let (field, rest) = digits(rest.strip_prefix('F')?)?;
    let channel_start = rest.rfind('C')?;
    let (channel, tail) = digits(&rest[channel_start + 1..])?;
    if !tail.is_empty() {
        return None;
    }
    Some(RawImage {
        file: file.to_path_buf(),
        plate: plate.to_string(),
        well: well.to_string(),
        site: SiteIndex::Sequence(field),
        channel: format!("C{channel:02}"),
    })
}

fn read_metamorph(file: &Path, file_name: &str) -> Option<RawImage> {
    let (stem, _extension) = file_name.rsplit_once('.')?;
    let (rest, channel) = stem.rsplit_once("_w")?;
    let (prefix, site) = rest.rsplit_once("_s")?;
    let (plate, well) = prefix.rsplit_once('_')?;
    let (site, tail) = digits(site)?;
    if plate.is_empty() || well.is_empty() || channel.is_empty() || !tail.is_empty() {
        return None;
    }
    Some(RawImage {
        file: file.to_path_buf(),
        plate: plate.to_string(),
        well: well.to_string(),
        site: SiteIndex::Sequence(site),
        channel: format!("w{channel}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::experiment::ExperimentConfig;

    fn template() -> NameTemplate {
        NameTemplate::parse(ExperimentConfig::DEFAULT_IMAGE_FILE_FORMAT).unwrap()
    }

    #[test]
    fn unknown_format_is_unsupported() {
        let err = MetadataFormat::from_name("zeiss").unwrap_err();
        assert!(matches!(err, JobError::UnsupportedFormat { ref format, .. } if format == "zeiss"));
        assert!(err.to_string().contains("default, cellvoyager, metamorph"));
    }

    #[test]
    fn names_round_trip() {
        for name in MetadataFormat::NAMES {
            assert_eq!(MetadataFormat::from_name(name).unwrap().name(), name);
        }
    }

    #[test]
    fn cellvoyager_names_give_field_and_channel() {
        let image = MetadataFormat::Cellvoyager
            .read(Path::new("/up/P1_B03_T0001F012L01A01Z01C02.tif"), &template())
            .unwrap();
        assert_eq!(image.plate, "P1");
        assert_eq!(image.well, "B03");
        assert_eq!(image.site, SiteIndex::Sequence(12));
        assert_eq!(image.channel, "C02");
    }

    #[test]
    fn metamorph_names_give_site_and_wavelength() {
        let image = MetadataFormat::Metamorph
            .read(Path::new("/up/screen_C05_s3_w1DAPI.TIF"), &template())
            .unwrap();
        assert_eq!(image.plate, "screen");
        assert_eq!(image.well, "C05");
        assert_eq!(image.site, SiteIndex::Sequence(3));
        assert_eq!(image.channel, "w1DAPI");
    }

    #[test]
    fn default_names_follow_the_template() {
        let image = MetadataFormat::Default
            .read(Path::new("P1_A01_y001_x002_gfp.png"), &template())
            .unwrap();
        assert_eq!(image.site, SiteIndex::Grid { y: 1, x: 2 });
        assert_eq!(image.channel, "gfp");
    }

    #[test]
    fn unrelated_files_are_not_recognized() {
        for format in [
            MetadataFormat::Default,
            MetadataFormat::Cellvoyager,
            MetadataFormat::Metamorph,
        ] {
            assert_eq!(format.read(Path::new("notes.txt"), &template()), None);
        }
    }
}
