use camera_core::{
    convert::FormatConverter,
    error::Error,
    format::PixelFormat,
    transcode::*,
};

fn chroma_samples(image: &Yuv420Image, index: usize) -> Vec<u8> {
    image.plane(index).chunks(image.stride(index)).take(image.chroma_height()).flat_map(|row| row[..image.chroma_width()].to_vec()).collect()
}

fn assert_solid_red(width: u32, height: u32) {
    let src = 0xF800u16.to_le_bytes().repeat((width * height) as usize);
    let mut image = Yuv420Image::new(width, height).unwrap();
    rgb565_to_yuv420(&src, width as usize * 2, &mut image).unwrap();

    for row in image.plane(0).chunks(image.stride(0)).take(height as usize) {
        assert!(row[..width as usize].iter().all(|y| *y == 76));
    }

    let u = chroma_samples(&image, 1);
    let v = chroma_samples(&image, 2);
    assert_eq!(u.len(), (width / 2 * height / 2) as usize);
    assert_eq!(v.len(), (width / 2 * height / 2) as usize);
    assert!(u.iter().all(|u| *u == 85));
    assert!(v.iter().all(|v| *v == 255));
}

#[test]
fn test_rgb565_red_to_yuv420() {
    assert_solid_red(640, 480);
    assert_solid_red(320, 240);
}

#[test]
fn test_odd_dimensions_rejected() {
    assert!(matches!(Yuv420Image::new(641, 480), Err(Error::InvalidParameter(_, _))));
    assert!(Yuv420Image::new(640, 0).is_err());
    assert!(Transcoder::new(PixelFormat::RGB565, 640, 481, 1280).unwrap_err().is_configuration());
    assert!(matches!(Transcoder::new(PixelFormat::NV12, 640, 480, 640), Err(Error::Unsupported(_))));
}

#[test]
fn test_rgb_and_bgr_order() {
    // 2x2 image, bytes R, G, B
    let rgb = [200u8, 10, 10, 200, 10, 10, 200, 10, 10, 200, 10, 10];
    let bgr: Vec<u8> = rgb.chunks(3).flat_map(|p| [p[2], p[1], p[0]]).collect();

    let mut from_rgb = Yuv420Image::new(2, 2).unwrap();
    let mut from_bgr = Yuv420Image::new(2, 2).unwrap();
    rgb24_to_yuv420(&rgb, 6, &mut from_rgb).unwrap();
    bgr24_to_yuv420(&bgr, 6, &mut from_bgr).unwrap();

    assert_eq!(from_rgb.to_packed(), from_bgr.to_packed());
    assert!(from_rgb.plane(2)[0] > 200);

    // libcamera BGR888 is stored R, G, B
    let transcoder = Transcoder::new(PixelFormat::BGR888, 2, 2, 6).unwrap();
    let mut image = transcoder.new_image().unwrap();
    transcoder.transcode(&[&rgb], &mut image).unwrap();
    assert_eq!(image.to_packed(), from_rgb.to_packed());
}

#[test]
fn test_chroma_from_top_left() {
    // top-left red, the rest of the block blue
    let rgb = [255u8, 0, 0, 0, 0, 255, 0, 0, 255, 0, 0, 255];
    let mut image = Yuv420Image::new(2, 2).unwrap();
    rgb24_to_yuv420(&rgb, 6, &mut image).unwrap();

    assert_eq!(image.plane(1)[0], 85);
    assert_eq!(image.plane(2)[0], 255);
    assert_eq!(&image.to_packed()[..4], &[76, 29, 29, 29]);
}

#[test]
fn test_copy_yuv420() {
    let (width, height) = (20usize, 4usize);
    let y: Vec<u8> = (0..width * height).map(|i| i as u8).collect();
    let u: Vec<u8> = (0..width * height / 4).map(|i| (i + 100) as u8).collect();
    let v: Vec<u8> = (0..width * height / 4).map(|i| (i + 200) as u8).collect();
    let expected = [y.as_slice(), u.as_slice(), v.as_slice()].concat();

    // strides differ, copied row by row
    let mut image = Yuv420Image::new(width as u32, height as u32).unwrap();
    assert_ne!(image.stride(0), width);
    copy_yuv420(&[&y, &u, &v], width, &mut image).unwrap();
    assert_eq!(image.to_packed(), expected);

    // strides match, copied as whole planes
    let mut image = Yuv420Image::with_alignment(width as u32, height as u32, 4).unwrap();
    assert_eq!(image.stride(0), width);
    copy_yuv420(&[&expected], width, &mut image).unwrap();
    assert_eq!(image.to_packed(), expected);

    assert!(copy_yuv420(&[&y, &u], width, &mut image).is_err());
    assert!(copy_yuv420(&[&expected[..10]], width, &mut image).is_err());
}

#[test]
fn test_round_trip_within_two() {
    let (width, height) = (64usize, 48usize);
    let mut rgb = vec![0u8; width * height * 3];
    for y in 0..height {
        for x in 0..width {
            // uniform 2x2 blocks so chroma subsampling loses nothing
            let (bx, by) = ((x / 2) as u32, (y / 2) as u32);
            let pixel = [(30 + bx * 5 % 190) as u8, (30 + by * 7 % 190) as u8, (30 + (bx + by) * 3 % 190) as u8];
            rgb[(y * width + x) * 3..][..3].copy_from_slice(&pixel);
        }
    }

    let mut image = Yuv420Image::new(width as u32, height as u32).unwrap();
    rgb24_to_yuv420(&rgb, width * 3, &mut image).unwrap();

    let mut converter = FormatConverter::new();
    converter.configure(PixelFormat::YUV420, width as u32, height as u32, image.stride(0) as u32).unwrap();
    let raster = converter.convert(&[image.plane(0), image.plane(1), image.plane(2)]).unwrap();

    for y in 0..height {
        for x in 0..width {
            let source = &rgb[(y * width + x) * 3..][..3];
            let (r, g, b) = raster.rgb_at(x as u32, y as u32);
            assert!(source[0].abs_diff(r) <= 2, "red at {},{}", x, y);
            assert!(source[1].abs_diff(g) <= 2, "green at {},{}", x, y);
            assert!(source[2].abs_diff(b) <= 2, "blue at {},{}", x, y);
        }
    }
}
