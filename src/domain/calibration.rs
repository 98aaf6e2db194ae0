//! Accelerometer calibration
//!
//! Maps raw 8-bit accelerometer counts to units of gravity using a
//! two-point profile per axis: the count read at 0 g and the count read at 1 g.
//!
//! The profile file is three lines of `"<zero> <one>"`, axis order x, y, z.

use crate::domain::models::AccelSample;
use crate::error::CalibrationError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name used for the per-user calibration profile
pub const DEFAULT_CALIBRATION_FILE: &str = ".wiimoteAccelConfig";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisCalibration {
    pub zero: f64,
    pub one: f64,
}

impl AxisCalibration {
    pub const IDENTITY: Self = Self { zero: 0.0, one: 1.0 };

    pub fn normalize(&self, raw: f64) -> f64 {
        (raw - self.zero) / (self.one - self.zero)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationProfile {
    pub x: AxisCalibration,
    pub y: AxisCalibration,
    pub z: AxisCalibration,
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self::identity()
    }
}

/// Where the driver should take its calibration profile from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationSource {
    /// `~/.wiimoteAccelConfig`
    Default,
    /// Use identity calibration without touching the filesystem
    Disabled,
    Path(PathBuf),
}

impl Default for CalibrationSource {
    fn default() -> Self {
        Self::Default
    }
}

impl CalibrationSource {
    pub fn resolve(&self) -> Option<PathBuf> {
        match self {
            Self::Default => default_calibration_path(),
            Self::Disabled => None,
            Self::Path(path) => Some(path.clone()),
        }
    }
}

pub fn default_calibration_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DEFAULT_CALIBRATION_FILE))
}

impl CalibrationProfile {
    /// `(0, 1)` on every axis, output equals the raw count
    pub fn identity() -> Self {
        Self {
            x: AxisCalibration::IDENTITY,
            y: AxisCalibration::IDENTITY,
            z: AxisCalibration::IDENTITY,
        }
    }

    pub fn axes(&self) -> [AxisCalibration; 3] {
        [self.x, self.y, self.z]
    }

    pub fn transform(&self, raw: [u8; 3]) -> [f64; 3] {
        [
            self.x.normalize(f64::from(raw[0])),
            self.y.normalize(f64::from(raw[1])),
            self.z.normalize(f64::from(raw[2])),
        ]
    }

    pub fn sample(&self, raw: [u8; 3]) -> AccelSample {
        AccelSample {
            raw,
            calibrated: self.transform(raw),
        }
    }

    fn from_axes(axes: [AxisCalibration; 3]) -> Result<Self, CalibrationError> {
        for (axis, cal) in ['x', 'y', 'z'].into_iter().zip(axes) {
            if cal.zero == cal.one {
                return Err(CalibrationError::DegenerateAxis {
                    axis,
                    value: cal.zero,
                });
            }
        }
        let [x, y, z] = axes;
        Ok(Self { x, y, z })
    }

    pub fn parse(contents: &str) -> Result<Self, CalibrationError> {
        let mut axes = Vec::with_capacity(3);

        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let line_no = idx + 1;
            let values = line
                .split_whitespace()
                .map(|field| {
                    field.parse::<f64>().map_err(|e| CalibrationError::Parse {
                        line: line_no,
                        reason: format!("{field:?}: {e}"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            match values.as_slice() {
                [zero, one] => axes.push(AxisCalibration {
                    zero: *zero,
                    one: *one,
                }),
                other => {
                    return Err(CalibrationError::Parse {
                        line: line_no,
                        reason: format!("expected 2 values, found {}", other.len()),
                    })
                }
            }
        }

        let axes: [AxisCalibration; 3] = axes
            .try_into()
            .map_err(|v: Vec<AxisCalibration>| CalibrationError::AxisCount(v.len()))?;
        Self::from_axes(axes)
    }

    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load the profile for `source`, falling back to identity calibration
    /// with a warning when the file is missing or unreadable.
    pub fn load_or_identity(source: &CalibrationSource) -> Self {
        let Some(path) = source.resolve() else {
            if *source == CalibrationSource::Default {
                warn!("Could not determine home directory, using identity calibration");
            }
            return Self::identity();
        };

        match Self::load(&path) {
            Ok(profile) => {
                info!("Loaded accelerometer calibration from {}", path.display());
                profile
            }
            Err(CalibrationError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                if *source == CalibrationSource::Default {
                    warn!(
                        "No accelerometer calibration found at {}, run the calibration tool to create one",
                        path.display()
                    );
                } else {
                    warn!("Invalid accelerometer calibration path: {}", path.display());
                }
                Self::identity()
            }
            Err(e) => {
                warn!(
                    "Unable to load accelerometer calibration from {}: {}",
                    path.display(),
                    e
                );
                Self::identity()
            }
        }
    }

    pub fn to_file_contents(&self) -> String {
        let mut out = String::new();
        for (idx, axis) in self.axes().iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            let _ = write!(out, "{} {}", axis.zero, axis.one);
        }
        out
    }

    pub fn save(&self, path: &Path) -> Result<(), CalibrationError> {
        fs::write(path, self.to_file_contents())?;
        info!("Saved accelerometer calibration to {}", path.display());
        Ok(())
    }

    /// Build a profile from three resting captures.
    ///
    /// * `face_up` - lying flat, buttons up (z sees 1 g)
    /// * `upright` - standing on its end, IR window down (y sees 1 g)
    /// * `left_side` - lying on its left side (x sees 1 g)
    ///
    /// Each axis' zero point is the mean of the two captures where it is
    /// horizontal.
    pub fn from_captures(
        face_up: [u8; 3],
        upright: [u8; 3],
        left_side: [u8; 3],
    ) -> Result<Self, CalibrationError> {
        let mean = |a: u8, b: u8| (f64::from(a) + f64::from(b)) / 2.0;
        Self::from_axes([
            AxisCalibration {
                zero: mean(face_up[0], upright[0]),
                one: f64::from(left_side[0]),
            },
            AxisCalibration {
                zero: mean(face_up[1], left_side[1]),
                one: f64::from(upright[1]),
            },
            AxisCalibration {
                zero: mean(upright[2], left_side[2]),
                one: f64::from(face_up[2]),
            },
        ])
    }
}
