use camera_core::format::*;
use strum::IntoEnumIterator;

#[test]
fn test_fourcc_lookup() {
    for format in PixelFormat::iter() {
        assert_eq!(PixelFormat::from_fourcc(format.fourcc()).unwrap(), format);
    }

    assert_eq!(PixelFormat::from_fourcc(fourcc(b"NV12")).unwrap(), PixelFormat::NV12);
    assert_eq!(PixelFormat::from_fourcc(fourcc(b"YU12")).unwrap(), PixelFormat::YUV420);
    assert!(PixelFormat::from_fourcc(fourcc(b"ABCD")).is_err());
}

#[test]
fn test_format_index() {
    assert_eq!(PixelFormat::try_from(0u32).unwrap(), PixelFormat::RGB565);
    assert_eq!(PixelFormat::try_from(fourcc(b"YUYV")).unwrap(), PixelFormat::YUYV);
    assert!(PixelFormat::try_from(200u32).is_err());
}

#[test]
fn test_format_family() {
    assert_eq!(PixelFormat::RGB565.family(), FormatFamily::PackedRgb);
    assert_eq!(PixelFormat::XRGB8888.family(), FormatFamily::PackedRgb);
    assert_eq!(PixelFormat::UYVY.family(), FormatFamily::PackedYuv);
    assert_eq!(PixelFormat::NV21.family(), FormatFamily::SemiPlanarYuv);
    assert_eq!(PixelFormat::YVU420.family(), FormatFamily::PlanarYuv);
    assert_eq!(PixelFormat::MJPEG.family(), FormatFamily::Compressed);

    assert!(PixelFormat::NV12.is_yuv());
    assert!(!PixelFormat::BGR888.is_yuv());
    assert!(PixelFormat::ARGB8888.has_alpha());
    assert!(!PixelFormat::XRGB8888.has_alpha());

    assert!(PixelFormat::XRGB8888.is_displayable());
    assert!(PixelFormat::ARGB8888.is_displayable());
    assert!(!PixelFormat::XBGR8888.is_displayable());
}

#[test]
fn test_yuv_positions() {
    let positions = |format: PixelFormat| match format.descriptor().layout {
        ComponentLayout::Yuv {
            y_pos,
            cb_pos,
        } => (y_pos, cb_pos),
        _ => panic!("not packed yuv"),
    };

    assert_eq!(positions(PixelFormat::YUYV), (0, 1));
    assert_eq!(positions(PixelFormat::YVYU), (0, 3));
    assert_eq!(positions(PixelFormat::UYVY), (1, 0));
    assert_eq!(positions(PixelFormat::VYUY), (1, 2));
}

#[test]
fn test_plane_layout() {
    let layout = PixelFormat::YUV420.plane_layout(640, 480, 640).unwrap();
    assert_eq!(layout.len(), 3);
    assert_eq!(layout[1].stride, 320);
    assert_eq!(layout[1].height, 240);
    assert_eq!(layout[1].offset, 640 * 480);
    assert_eq!(layout[2].offset, 640 * 480 + 320 * 240);

    let layout = PixelFormat::NV16.plane_layout(640, 480, 640).unwrap();
    assert_eq!(layout.len(), 2);
    assert_eq!(layout[1].stride, 640);
    assert_eq!(layout[1].height, 480);

    let layout = PixelFormat::NV24.plane_layout(64, 48, 64).unwrap();
    assert_eq!(layout[1].stride, 128);

    assert_eq!(PixelFormat::NV12.frame_size(640, 480, 640).unwrap(), 640 * 480 * 3 / 2);
    assert_eq!(PixelFormat::RGB565.frame_size(640, 480, 1280).unwrap(), 1280 * 480);

    assert!(PixelFormat::RGB888.plane_layout(640, 480, 1000).is_err());
    assert!(PixelFormat::RGB888.plane_layout(0, 480, 1920).is_err());

    assert!(PixelFormat::YUV420.plane_layout(5, 4, 5).is_err());
    assert!(PixelFormat::NV21.plane_layout(5, 4, 5).is_err());
    let layout = PixelFormat::YUV420.plane_layout(5, 4, 6).unwrap();
    assert_eq!((layout[1].stride, layout[1].height), (3, 2));
}

#[test]
fn test_channel_scaling() {
    let red = Channel {
        shift: 11,
        bits: 5,
    };
    assert_eq!(red.extract(0xF800), 255);
    assert_eq!(red.extract(0x07FF), 0);
    assert_eq!(red.encode(255), 0xF800);
    assert_eq!(red.extract(red.encode(128)), 131);
}
