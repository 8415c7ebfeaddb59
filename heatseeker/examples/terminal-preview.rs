// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
use std::env;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{bail, Context};
use linux_embedded_hal::I2cdev;

use heatseeker::{Camera, CameraConfig, HotspotConfig, HotspotLocator, MonotonicClock};

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        bail!("Two arguments required: <I2C bus> <camera address>");
    }
    let address = match args[2].strip_prefix("0x") {
        Some(hex_digits) => u8::from_str_radix(hex_digits, 16),
        None => args[2].parse(),
    }
    .context("the camera address must be a number")?;
    let bus = I2cdev::new(&args[1]).with_context(|| format!("unable to open {}", args[1]))?;
    let config = CameraConfig {
        address,
        ..CameraConfig::default()
    };
    let mut camera = Camera::new(bus, MonotonicClock::new(), &config)?;
    let delay = Duration::from_millis(u64::from(config.frame_rate.subpage_period_ms()) / 4);
    let frame = loop {
        if let Some(frame) = camera.poll()? {
            break frame;
        }
        sleep(delay);
    };
    println!("{}", frame.ascii_art());
    println!("Ambient: {:.2}°C", frame.ambient_temperature());
    let target = HotspotLocator::new(&HotspotConfig::default()).locate(&frame);
    match target.hottest() {
        Some(hotspot) => println!(
            "Hottest: {:.2}°C at row {}, column {}{}",
            hotspot.temperature,
            hotspot.row,
            hotspot.column,
            if target.is_valid() { "" } else { " (below threshold)" }
        ),
        None => println!("No valid pixels"),
    }
    Ok(())
}
