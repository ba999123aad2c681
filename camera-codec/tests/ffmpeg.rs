#![cfg(feature = "ffmpeg")]

use camera_codec::{
    encoder::*,
    pipeline::*,
    sink::{StreamWriter, END_OF_STREAM_MARKER},
    CodecID,
};
use camera_core::{error::Error, format::PixelFormat, transcode::Yuv420Image};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

#[test]
fn test_mpeg1_encoder_drains_on_flush() {
    let builder = find_encoder(CodecID::MPEG1Video).unwrap();
    assert_eq!(builder.name(), "mpeg1video");
    assert_eq!(builder.extension(), "mpg");

    let params = VideoEncoderParameters::new(WIDTH, HEIGHT, 25, 400_000);
    let mut encoder = builder.new_encoder(CodecID::MPEG1Video, &params, None).unwrap();
    assert!(builder.new_encoder(CodecID::H264, &params, None).is_err());

    let mut image = Yuv420Image::new(WIDTH, HEIGHT).unwrap();
    let mut packets = Vec::new();
    for pts in 0..3 {
        let (y, _, _) = image.planes_mut();
        y.fill(40 + pts as u8 * 60);
        encoder.send_frame(&image, pts).unwrap();
        while let Ok(packet) = encoder.receive_packet() {
            packets.push(packet);
        }
    }

    encoder.flush().unwrap();
    loop {
        match encoder.receive_packet() {
            Ok(packet) => packets.push(packet),
            Err(Error::Eof) => break,
            Err(err) => panic!("unexpected error: {}", err),
        }
    }

    assert_eq!(packets.len(), 3);
    assert!(packets[0].is_key());
    assert!(packets.iter().all(|packet| !packet.is_empty()));
    assert!(matches!(encoder.send_frame(&image, 3), Err(Error::Invalid(_))));
}

#[test]
fn test_mpeg1_recording() {
    let path = std::env::temp_dir().join(format!("camera-codec-ffmpeg-{}.mpg", std::process::id()));
    let mut params = RecordingParameters::new(PixelFormat::YUV420, WIDTH, HEIGHT, WIDTH);
    params.frame_rate = 25;
    params.bit_rate = 400_000;
    params.codec = "mpeg1video".to_string();

    let mut pipeline = EncodingPipeline::new();
    pipeline.begin(&params, Box::new(StreamWriter::create(&path).unwrap())).unwrap();

    let frame_bytes = (WIDTH * HEIGHT * 3 / 2) as usize;
    for i in 0..10u64 {
        let mut frame = vec![128u8; frame_bytes];
        frame[..(WIDTH * HEIGHT) as usize].fill(i as u8 * 20);
        pipeline.submit(&[&frame], i * 40_000).unwrap();
    }

    let summary = pipeline.end().unwrap().unwrap();
    assert_eq!(summary.frame_count, 10);
    assert_eq!(summary.packet_count, 10);

    // sequence header first, sequence end code last
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], &[0x00, 0x00, 0x01, 0xB3]);
    assert!(bytes.ends_with(&END_OF_STREAM_MARKER));
    std::fs::remove_file(&path).unwrap();
}
