use std::{sync::Arc, time::Duration};

use camera_core::{convert::FormatConverter, format::PixelFormat, frame::Frame};
use camera_device::{
    dispatch::{wake_channel, Dispatcher},
    fanout::{FanOut, Route},
    pool::BufferPool,
    request::Controls,
    virtual_camera::VirtualDevice,
    Device, StreamRequest, StreamRole,
};
use log::{info, warn};

fn main() -> camera_core::Result<()> {
    env_logger::init();

    let mut device = VirtualDevice::new("virtual:0").with_frame_rate(30);
    let configs = device.configure(&[StreamRequest {
        role: StreamRole::Viewfinder,
        format: PixelFormat::YUYV,
        width: 640,
        height: 480,
    }])?;
    let config = configs[0];

    let mut converter = FormatConverter::new();
    converter.configure(config.format, config.width, config.height, config.stride)?;

    let mut fanout = FanOut::new();
    fanout.set_handler(
        Route::Preview,
        Arc::new(move |frame: Frame| -> camera_core::Result<()> {
            let raster = converter.convert_frame(&frame)?;
            let (r, g, b) = raster.rgb_at(0, 0);
            info!("frame: {}, timestamp: {}us, first pixel: ({}, {}, {})", frame.sequence, frame.timestamp, r, g, b);
            Ok(())
        }),
    );

    let pool = Arc::new(BufferPool::new());
    let requests = pool.start(&mut device, &configs, 4, &Controls::default())?;
    let (waker, wake_rx) = wake_channel();
    let dispatcher = Arc::new(Dispatcher::new(pool.clone(), waker));

    device.start(dispatcher.completion_handler())?;
    for request in requests {
        pool.queue(&mut device, request)?;
    }

    let mut frames = 0;
    while frames < 60 {
        if wake_rx.recv_timeout(Duration::from_secs(1)).is_err() {
            warn!("no frame within a second");
            continue;
        }
        while let Some(request) = dispatcher.drain() {
            frames += fanout.dispatch(&request);
            for buffer in pool.reuse(request) {
                pool.recycle(&mut device, buffer)?;
            }
        }
    }

    device.stop()?;
    pool.stop();
    device.release();

    Ok(())
}
