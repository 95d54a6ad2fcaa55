/*! Stereo camera calibration: a schemaed JSON form and a legacy tagged-binary
 * form (format picked by file extension).
 *
 * The binary format is read/written as a stream of tagged matrices —
 * `{elem_size: u32, rows: u32, cols: u32}` followed by `rows*cols*elem_size`
 * raw bytes — mirroring `t_file.cpp`'s matrix helpers, in the fixed order
 * camera0 intrinsics, camera0 distortion, camera0 resolution, camera1
 * intrinsics, camera1 distortion, camera1 resolution, rotation, translation,
 * essential, fundamental. The original's exact on-disk byte order is not
 * independently verifiable, so this crate preserves the transpose-on-mismatch
 * and short-read-tolerant fallback (see DESIGN.md) and treats this order as
 * its own self-consistent contract.
 */

use std::io::{Read, Write};
use std::path::Path;

use crate::error::CompositorError;
use crate::json::{JsonBuilder, JsonNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistortionModel {
    PinholeRadtan5,
    FisheyeEquidistant4,
}

impl DistortionModel {
    fn as_str(&self) -> &'static str {
        match self {
            Self::PinholeRadtan5 => "pinhole_radtan5",
            Self::FisheyeEquidistant4 => "fisheye_equidistant4",
        }
    }

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pinhole_radtan5" => Ok(Self::PinholeRadtan5),
            "fisheye_equidistant4" => Ok(Self::FisheyeEquidistant4),
            other => Err(CompositorError::SchemaMismatch(format!(
                "unknown distortion model `{other}`"
            ))
            .into()),
        }
    }

    fn coefficient_count(&self) -> usize {
        match self {
            Self::PinholeRadtan5 => 5,
            Self::FisheyeEquidistant4 => 4,
        }
    }

    /// Key order used both when emitting the JSON `distortion` object and
    /// when laying coefficients out in the legacy binary's fixed-width
    /// 5-element distortion matrix (fisheye4's k4 occupies the slot radtan5
    /// uses for k3).
    fn keys(&self) -> &'static [&'static str] {
        match self {
            Self::PinholeRadtan5 => &["k1", "k2", "p1", "p2", "k3"],
            Self::FisheyeEquidistant4 => &["k1", "k2", "k3", "k4"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct CameraCalibration {
    pub width: u32,
    pub height: u32,
    /// fx, fy, cx, cy
    pub intrinsics: [f64; 4],
    pub distortion_model: DistortionModel,
    pub distortion: Vec<f64>,
}

impl CameraCalibration {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.distortion.len() != self.distortion_model.coefficient_count() {
            return Err(CompositorError::SchemaMismatch(format!(
                "{:?} requires {} distortion coefficients, got {}",
                self.distortion_model,
                self.distortion_model.coefficient_count(),
                self.distortion.len()
            ))
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StereoCalibration {
    pub cameras: [CameraCalibration; 2],
    /// Row-major 3x3 rotation from camera0 to camera1.
    pub rotation: [f64; 9],
    pub translation: [f64; 3],
    pub essential: [f64; 9],
    pub fundamental: [f64; 9],
}

const SCHEMA_VERSION: i64 = 2;

impl StereoCalibration {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.cameras[0].validate()?;
        self.cameras[1].validate()?;
        Ok(())
    }

    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            Self::from_json(std::str::from_utf8(&bytes)?)
        } else {
            Self::from_legacy_binary(&bytes)
        }
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let node = JsonNode::parse(text)?;

        let cameras_node = node
            .get("cameras")
            .ok_or_else(|| CompositorError::SchemaMismatch("missing `cameras`".into()))?;
        let cameras_arr = cameras_node
            .as_array()
            .ok_or_else(|| CompositorError::SchemaMismatch("`cameras` not an array".into()))?;
        if cameras_arr.len() != 2 {
            return Err(
                CompositorError::SchemaMismatch("`cameras` must have exactly 2 entries".into()).into(),
            );
        }

        let parse_camera = |c: &JsonNode| -> anyhow::Result<CameraCalibration> {
            let model = DistortionModel::from_str(
                c.get("model")
                    .ok_or_else(|| CompositorError::SchemaMismatch("missing `model`".into()))?
                    .as_string_or(""),
            )?;
            let intrinsics_node = c
                .get("intrinsics")
                .ok_or_else(|| CompositorError::SchemaMismatch("missing `intrinsics`".into()))?;
            let intrinsics = [
                intrinsics_node.get("fx").map(|n| n.as_double_or(0.0)).unwrap_or(0.0),
                intrinsics_node.get("fy").map(|n| n.as_double_or(0.0)).unwrap_or(0.0),
                intrinsics_node.get("cx").map(|n| n.as_double_or(0.0)).unwrap_or(0.0),
                intrinsics_node.get("cy").map(|n| n.as_double_or(0.0)).unwrap_or(0.0),
            ];
            let distortion_node = c
                .get("distortion")
                .ok_or_else(|| CompositorError::SchemaMismatch("missing `distortion`".into()))?;
            let distortion = model
                .keys()
                .iter()
                .map(|k| distortion_node.get(k).map(|n| n.as_double_or(0.0)).unwrap_or(0.0))
                .collect();
            let resolution = c
                .get("resolution")
                .ok_or_else(|| CompositorError::SchemaMismatch("missing `resolution`".into()))?;
            Ok(CameraCalibration {
                width: resolution.get("width").map(|n| n.as_int_or(0) as u32).unwrap_or(0),
                height: resolution.get("height").map(|n| n.as_int_or(0) as u32).unwrap_or(0),
                intrinsics,
                distortion_model: model,
                distortion,
            })
        };

        let stereo_node = node
            .get("opencv_stereo_calibrate")
            .ok_or_else(|| CompositorError::SchemaMismatch("missing `opencv_stereo_calibrate`".into()))?;
        let read_n = |n: &JsonNode, count: usize| -> Vec<f64> {
            n.as_array()
                .map(|arr| arr.iter().take(count).map(|v| v.as_double_or(0.0)).collect())
                .unwrap_or_default()
        };
        let to_9 = |v: Vec<f64>| -> [f64; 9] {
            let mut out = [0.0; 9];
            for (i, x) in v.into_iter().take(9).enumerate() {
                out[i] = x;
            }
            out
        };
        let to_3 = |v: Vec<f64>| -> [f64; 3] {
            let mut out = [0.0; 3];
            for (i, x) in v.into_iter().take(3).enumerate() {
                out[i] = x;
            }
            out
        };

        let stereo = StereoCalibration {
            cameras: [parse_camera(&cameras_arr[0])?, parse_camera(&cameras_arr[1])?],
            rotation: to_9(stereo_node.get("rotation").map(|n| read_n(&n, 9)).unwrap_or_default()),
            translation: to_3(
                stereo_node
                    .get("translation")
                    .map(|n| read_n(&n, 3))
                    .unwrap_or_default(),
            ),
            essential: to_9(stereo_node.get("essential").map(|n| read_n(&n, 9)).unwrap_or_default()),
            fundamental: to_9(
                stereo_node
                    .get("fundamental")
                    .map(|n| read_n(&n, 9))
                    .unwrap_or_default(),
            ),
        };
        stereo.validate()?;
        Ok(stereo)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        let mut b = JsonBuilder::new();
        b.begin_object();
        b.key("metadata").begin_object().key("version").value(SCHEMA_VERSION).end_object();
        b.key("cameras").begin_array();
        for cam in &self.cameras {
            b.begin_object();
            b.key("model").value(cam.distortion_model.as_str());
            b.key("intrinsics").begin_object();
            b.key("fx").value(cam.intrinsics[0]);
            b.key("fy").value(cam.intrinsics[1]);
            b.key("cx").value(cam.intrinsics[2]);
            b.key("cy").value(cam.intrinsics[3]);
            b.end_object();
            b.key("distortion").begin_object();
            for (k, v) in cam.distortion_model.keys().iter().zip(cam.distortion.iter()) {
                b.key(k).value(*v);
            }
            b.end_object();
            b.key("resolution").begin_object();
            b.key("width").value(cam.width as i64);
            b.key("height").value(cam.height as i64);
            b.end_object();
            b.end_object();
        }
        b.end_array();
        b.key("opencv_stereo_calibrate").begin_object();
        for (key, data) in [
            ("rotation", &self.rotation[..]),
            ("translation", &self.translation[..]),
            ("essential", &self.essential[..]),
            ("fundamental", &self.fundamental[..]),
        ] {
            b.key(key).begin_array();
            for v in data {
                b.value(*v);
            }
            b.end_array();
        }
        b.end_object();
        b.end_object();
        b.build().to_string_pretty()
    }

    pub fn save_json(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn from_legacy_binary(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        let cam0_intrinsics = read_matrix(&mut cursor, 1, 4)?;
        let cam0_distortion = read_matrix(&mut cursor, 1, 5)?;
        let cam0_resolution = read_matrix(&mut cursor, 1, 2)?;
        let cam1_intrinsics = read_matrix(&mut cursor, 1, 4)?;
        let cam1_distortion = read_matrix(&mut cursor, 1, 5)?;
        let cam1_resolution = read_matrix(&mut cursor, 1, 2)?;
        let rotation = read_matrix(&mut cursor, 3, 3)?;
        let translation = read_matrix(&mut cursor, 1, 3)?;
        // Essential/fundamental are optional trailing matrices; a short read
        // here is tolerated (warn, default to identity-ish zero), matching
        // the original's tolerance for optional trailing matrices.
        let essential = read_matrix(&mut cursor, 3, 3).unwrap_or_else(|_| {
            log::warn!("legacy calibration file missing essential matrix, defaulting to zero");
            vec![0.0; 9]
        });
        let fundamental = read_matrix(&mut cursor, 3, 3).unwrap_or_else(|_| {
            log::warn!("legacy calibration file missing fundamental matrix, defaulting to zero");
            vec![0.0; 9]
        });

        let to_array4 = |v: &[f64]| -> [f64; 4] {
            let mut out = [0.0; 4];
            out.copy_from_slice(&v[..4]);
            out
        };
        let to_array9 = |v: &[f64]| -> [f64; 9] {
            let mut out = [0.0; 9];
            out.copy_from_slice(&v[..9]);
            out
        };
        let to_array3 = |v: &[f64]| -> [f64; 3] {
            let mut out = [0.0; 3];
            out.copy_from_slice(&v[..3]);
            out
        };

        let camera0 = CameraCalibration {
            width: cam0_resolution.first().copied().unwrap_or(0.0) as u32,
            height: cam0_resolution.get(1).copied().unwrap_or(0.0) as u32,
            intrinsics: to_array4(&cam0_intrinsics),
            distortion_model: DistortionModel::PinholeRadtan5,
            distortion: cam0_distortion[..5].to_vec(),
        };
        let camera1 = CameraCalibration {
            width: cam1_resolution.first().copied().unwrap_or(0.0) as u32,
            height: cam1_resolution.get(1).copied().unwrap_or(0.0) as u32,
            intrinsics: to_array4(&cam1_intrinsics),
            distortion_model: DistortionModel::PinholeRadtan5,
            distortion: cam1_distortion[..5].to_vec(),
        };

        let stereo = StereoCalibration {
            cameras: [camera0, camera1],
            rotation: to_array9(&rotation),
            translation: to_array3(&translation),
            essential: to_array9(&essential),
            fundamental: to_array9(&fundamental),
        };
        stereo.validate()?;
        Ok(stereo)
    }

    pub fn save_legacy_binary(&self, path: &Path) -> anyhow::Result<()> {
        let mut out = Vec::new();
        for cam in &self.cameras {
            write_matrix(&mut out, 1, 4, &cam.intrinsics)?;
            let mut distortion = cam.distortion.clone();
            distortion.resize(5, 0.0);
            write_matrix(&mut out, 1, 5, &distortion)?;
            write_matrix(&mut out, 1, 2, &[cam.width as f64, cam.height as f64])?;
        }
        write_matrix(&mut out, 3, 3, &self.rotation)?;
        write_matrix(&mut out, 1, 3, &self.translation)?;
        write_matrix(&mut out, 3, 3, &self.essential)?;
        write_matrix(&mut out, 3, 3, &self.fundamental)?;
        std::fs::write(path, out)?;
        Ok(())
    }
}

/// Reads one `{elem_size, rows, cols}` + raw `f64` payload matrix, applying
/// the original's transpose fallback: if the header's `(rows, cols)` are
/// swapped relative to what the caller expects, the data is still read and
/// returned for the swapped shape rather than rejected outright.
fn read_matrix<R: Read>(reader: &mut R, expect_rows: usize, expect_cols: usize) -> anyhow::Result<Vec<f64>> {
    let mut header = [0u8; 12];
    reader
        .read_exact(&mut header)
        .map_err(|_| CompositorError::ShortRead("matrix header".into()))?;
    let elem_size = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
    let mut rows = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
    let mut cols = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;

    if elem_size != std::mem::size_of::<f64>() {
        return Err(CompositorError::SchemaMismatch(format!(
            "matrix element size {elem_size} does not match expected f64 width"
        ))
        .into());
    }

    if rows == expect_cols && cols == expect_rows && rows != cols {
        std::mem::swap(&mut rows, &mut cols);
    }

    let count = rows * cols;
    let mut data = vec![0u8; count * elem_size];
    reader
        .read_exact(&mut data)
        .map_err(|_| CompositorError::ShortRead("matrix payload".into()))?;

    Ok(data
        .chunks_exact(elem_size)
        .map(|chunk| f64::from_le_bytes(chunk.try_into().unwrap()))
        .collect())
}

fn write_matrix<W: Write>(writer: &mut W, rows: usize, cols: usize, data: &[f64]) -> anyhow::Result<()> {
    debug_assert_eq!(rows * cols, data.len());
    writer.write_all(&(std::mem::size_of::<f64>() as u32).to_le_bytes())?;
    writer.write_all(&(rows as u32).to_le_bytes())?;
    writer.write_all(&(cols as u32).to_le_bytes())?;
    for v in data {
        writer.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StereoCalibration {
        StereoCalibration {
            cameras: [
                CameraCalibration {
                    width: 640,
                    height: 480,
                    intrinsics: [600.0, 600.5, 320.0, 240.0],
                    distortion_model: DistortionModel::PinholeRadtan5,
                    distortion: vec![0.01, -0.02, 0.001, 0.002, 0.0],
                },
                CameraCalibration {
                    width: 640,
                    height: 480,
                    intrinsics: [601.0, 601.5, 321.0, 241.0],
                    distortion_model: DistortionModel::PinholeRadtan5,
                    distortion: vec![0.015, -0.025, 0.0015, 0.0025, 0.0],
                },
            ],
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            translation: [-0.064, 0.0, 0.0],
            essential: [0.0; 9],
            fundamental: [0.0; 9],
        }
    }

    #[test]
    fn json_round_trip_preserves_values_to_schema() {
        let cal = sample();
        let text = cal.to_json().unwrap();
        assert!(text.contains("\"pinhole_radtan5\""));
        assert!(text.contains("\"opencv_stereo_calibrate\""));
        let back = StereoCalibration::from_json(&text).unwrap();
        assert_eq!(back.cameras[0].width, 640);
        assert_eq!(back.cameras[0].intrinsics, cal.cameras[0].intrinsics);
        assert_eq!(back.cameras[1].distortion, cal.cameras[1].distortion);
        assert_eq!(back.translation, cal.translation);
        assert_eq!(back.rotation, cal.rotation);
    }

    #[test]
    fn legacy_binary_round_trip_is_bit_exact() {
        let cal = sample();
        cal.validate().unwrap();
        let mut out = Vec::new();
        for cam in &cal.cameras {
            write_matrix(&mut out, 1, 4, &cam.intrinsics).unwrap();
            let mut distortion = cam.distortion.clone();
            distortion.resize(5, 0.0);
            write_matrix(&mut out, 1, 5, &distortion).unwrap();
            write_matrix(&mut out, 1, 2, &[cam.width as f64, cam.height as f64]).unwrap();
        }
        write_matrix(&mut out, 3, 3, &cal.rotation).unwrap();
        write_matrix(&mut out, 1, 3, &cal.translation).unwrap();
        write_matrix(&mut out, 3, 3, &cal.essential).unwrap();
        write_matrix(&mut out, 3, 3, &cal.fundamental).unwrap();

        let back = StereoCalibration::from_legacy_binary(&out).unwrap();
        assert_eq!(back.cameras[0].intrinsics, cal.cameras[0].intrinsics);
        assert_eq!(back.cameras[1].distortion, cal.cameras[1].distortion);
        assert_eq!(back.rotation, cal.rotation);
        assert_eq!(back.translation, cal.translation);
    }

    #[test]
    fn legacy_binary_tolerates_missing_optional_trailing_matrices() {
        let cal = sample();
        let mut out = Vec::new();
        for cam in &cal.cameras {
            write_matrix(&mut out, 1, 4, &cam.intrinsics).unwrap();
            let mut distortion = cam.distortion.clone();
            distortion.resize(5, 0.0);
            write_matrix(&mut out, 1, 5, &distortion).unwrap();
            write_matrix(&mut out, 1, 2, &[cam.width as f64, cam.height as f64]).unwrap();
        }
        write_matrix(&mut out, 3, 3, &cal.rotation).unwrap();
        write_matrix(&mut out, 1, 3, &cal.translation).unwrap();
        // no essential/fundamental appended

        let back = StereoCalibration::from_legacy_binary(&out).unwrap();
        assert_eq!(back.translation, cal.translation);
        assert_eq!(back.essential, [0.0; 9]);
    }
}
