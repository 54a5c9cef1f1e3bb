//! Sensors module.
//!
use common::Frame;
use image::RgbImage;
use rscam::{Camera, Config};
use simple_error::{bail, simple_error};

use crate::{CaptureSource, Error};

/// Which way the camera faces.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum Facing {
    /// Front camera looking at the user, previewed mirrored.
    #[default]
    User,
    /// Rear camera looking at the scene.
    Environment,
}

impl Facing {
    pub fn is_mirrored(&self) -> bool {
        matches!(self, Facing::User)
    }
}

/// Requested video stream of a camera device.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub device: String,
    /// FourCC pixel format, `MJPG` or `RGB3`.
    pub format: String,
    /// Falls back to the maximum resolution of the format.
    pub resolution: Option<(u32, u32)>,
    /// Frame interval as `(numerator, denominator)`, falls back to the fastest one.
    pub frame_rate: Option<(u32, u32)>,
    pub facing: Facing,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            format: "MJPG".into(),
            resolution: Some((1280, 720)),
            frame_rate: Some((1, 30)),
            facing: Facing::User,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PixelFormat {
    Mjpg,
    Rgb3,
}

impl PixelFormat {
    fn parse(format: &str) -> Result<Self, Error> {
        match format {
            "MJPG" => Ok(PixelFormat::Mjpg),
            "RGB3" => Ok(PixelFormat::Rgb3),
            other => bail!("Unsupported pixel format {}", other),
        }
    }
}

/// Camera on a Linux machine, accessed through V4L2.
pub struct V4lCamera {
    cam: Camera,
    format: PixelFormat,
    facing: Facing,
    ready: bool,
}

impl V4lCamera {
    /// Open the device and start streaming with the requested configuration.
    pub fn open(config: &CameraConfig) -> Result<Self, Error> {
        let pixel_format = PixelFormat::parse(&config.format)?;

        let mut cam = Camera::new(&config.device)?;
        log_supported_formats(&cam, &config.format);
        let format = config.format.as_bytes();

        log::info!("Using camera {}", &config.device);

        let resolution = config
            .resolution
            .map(Ok)
            .unwrap_or_else(|| get_max_resolution(&cam, format))?;

        let frame_rate = config
            .frame_rate
            .map(Ok)
            .unwrap_or_else(|| get_max_frame_rate(&cam, format, resolution))?;

        cam.start(&Config {
            interval: frame_rate,
            resolution,
            format,
            ..Default::default()
        })?;

        log::info!(
            "Streaming {}x{} {} at {}/{}s, facing {:?}",
            resolution.0,
            resolution.1,
            &config.format,
            frame_rate.0,
            frame_rate.1,
            config.facing
        );

        Ok(Self {
            cam,
            format: pixel_format,
            facing: config.facing,
            ready: false,
        })
    }
}

impl CaptureSource for V4lCamera {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn capture(&mut self) -> Result<Option<Frame>, Error> {
        let raw = self.cam.capture()?;
        let (width, height) = raw.resolution;

        let image: Option<RgbImage> = match self.format {
            // The first frames of some devices are truncated and fail to decode
            PixelFormat::Mjpg => match turbojpeg::decompress_image(&raw[..]) {
                Ok(image) => Some(image),
                Err(err) => {
                    log::debug!("Dropping undecodable frame: {err}");
                    None
                }
            },
            PixelFormat::Rgb3 => RgbImage::from_raw(width, height, raw[..].to_vec()),
        };

        match image {
            Some(image) => {
                if !self.ready {
                    log::info!("Camera ready, first frame decoded");
                    self.ready = true;
                }
                Ok(Some(Frame::new(image)))
            }
            None => Ok(None),
        }
    }

    fn facing(&self) -> Facing {
        self.facing
    }
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32), Error> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            // Map to iterator over ((width, height) num_pixels)
            .map(|res| (res, res.0 * res.1))
            .max_by(|a, b| a.1.cmp(&b.1))
            .map(|res| *res.0),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    }
    .ok_or_else(|| simple_error!("No resolution found").into())
}

/// Get the maximum supported frame rate for the given format and resolution.
fn get_max_frame_rate(
    cam: &Camera,
    format: &[u8],
    resolution: (u32, u32),
) -> Result<(u32, u32), Error> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        // Intervals are seconds per frame, the shortest one is the fastest
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .iter()
            .min_by(|a, b| {
                (a.0 as u64 * b.1 as u64).cmp(&(b.0 as u64 * a.1 as u64))
            })
            .copied(),
        rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
    }
    .ok_or_else(|| simple_error!("No frame rate found").into())
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn get_cam_info_if_available() -> Result<(), Error> {
        let cam_name = "/dev/video0";
        let cam = Camera::new(cam_name);

        match cam {
            Err(err) => println!("Could not initialize camera (maybe non available): {err}"),
            Ok(cam) => {
                let formats: Vec<_> = cam.formats().collect();
                println!("Supported formats: {formats:?}");

                let format = b"MJPG";

                let resolutions = cam.resolutions(format)?;
                println!("Supported resolutions: {resolutions:?}");

                let selected_resolution = get_max_resolution(&cam, format)?;
                let frame_rates = cam.intervals(format, selected_resolution)?;
                println!("Supported frame rates: {frame_rates:?}");
            }
        }

        Ok(())
    }

    #[test]
    fn test_pixel_format() {
        assert_eq!(PixelFormat::parse("MJPG").unwrap(), PixelFormat::Mjpg);
        assert_eq!(PixelFormat::parse("RGB3").unwrap(), PixelFormat::Rgb3);
        assert!(PixelFormat::parse("YUYV").is_err());
    }

    #[test]
    fn test_unsupported_format_fails_before_opening() {
        let config = CameraConfig {
            device: "/dev/does-not-exist".into(),
            format: "H264".into(),
            ..Default::default()
        };
        let err = V4lCamera::open(&config).err().unwrap();
        assert!(err.to_string().contains("Unsupported pixel format"));
    }

    #[test]
    fn test_missing_device() {
        let config = CameraConfig {
            device: "/dev/does-not-exist".into(),
            ..Default::default()
        };
        assert!(V4lCamera::open(&config).is_err());
    }

    #[test]
    fn test_facing_mirrors_user_camera() {
        assert!(Facing::User.is_mirrored());
        assert!(!Facing::Environment.is_mirrored());
    }
}
