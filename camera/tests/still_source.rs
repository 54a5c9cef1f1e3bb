use camera::{CaptureSource, Facing, StillImageSource};
use common::Frame;
use image::{Rgb, RgbImage};

#[test]
fn test_still_image_source_repeats_frame() {
    let image = RgbImage::from_pixel(8, 4, Rgb([10, 20, 30]));
    let mut source = StillImageSource::from_frame(Frame::new(image));

    assert!(source.is_ready());
    assert_eq!(source.facing(), Facing::Environment);

    for _ in 0..3 {
        let frame = source.capture().unwrap().expect("frame");
        assert_eq!(frame.dimensions(), (8, 4));
        assert_eq!(frame.image().get_pixel(3, 2), &Rgb([10, 20, 30]));
    }
}

#[test]
fn test_empty_still_image_is_never_ready() {
    let mut source =
        StillImageSource::from_frame(Frame::new(RgbImage::new(0, 0))).with_facing(Facing::User);

    assert!(!source.is_ready());
    assert!(source.capture().unwrap().is_none());
    assert!(source.facing().is_mirrored());
}

#[test]
fn test_missing_image_file() {
    assert!(StillImageSource::open("does/not/exist.jpg").is_err());
}
