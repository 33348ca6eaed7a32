/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

// Runs a synthetic Opus stream through a lossy link:
// 1. Encodes a sine tone in 20 ms frames and packetizes it to RTP.
// 2. Drops packets at random, optionally in bursts.
// 3. Depacketizes and decodes the survivors with PLC/FEC recovery.
// 4. Periodically sends an RTCP receiver report back to the sender, which
//    adapts its encoder.
// 5. Prints both sides' statistics as JSON.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rtcp::receiver_report::ReceiverReport;
use rtcp::reception_report::ReceptionReport;
use webrtc_util::Marshal;

use rtc_media_pipeline::engine::opus::OpusEngine;
use rtc_media_pipeline::{
    AudioConfig, AudioFrame, AudioSession, CodecSession, Feedback, PipelineConfig,
    TransportPacket,
};

#[derive(Parser, Debug)]
#[clap(about = "Simulates a lossy Opus link through the media pipeline", version)]
struct Args {
    #[clap(long, default_value_t = 30, help = "Length of the simulated call in seconds")]
    seconds: u32,

    #[clap(long, default_value_t = 8.0, help = "Packet loss probability in percent")]
    loss_percent: f64,

    #[clap(
        long,
        default_value_t = 1,
        help = "Maximum number of consecutive packets lost per loss event"
    )]
    max_burst: u32,

    #[clap(long, default_value_t = 500, help = "Receiver report interval in milliseconds")]
    report_interval_ms: u32,

    #[clap(long, help = "Seed for the loss pattern")]
    seed: Option<u64>,

    #[clap(long, help = "Path to a JSON pipeline configuration")]
    config: Option<String>,
}

fn tone(config: &AudioConfig, frame_index: u32) -> AudioFrame {
    let samples_per_frame = config.samples_per_frame();
    let channels = config.channels as usize;
    let start = frame_index as usize * samples_per_frame;
    let samples = (0..samples_per_frame)
        .flat_map(|i| {
            let t = (start + i) as f64 / config.clock_rate as f64;
            let value = ((t * 440.0 * std::f64::consts::TAU).sin() * 8000.0) as i16;
            std::iter::repeat(value).take(channels)
        })
        .collect();
    AudioFrame::new(
        samples,
        config.clock_rate,
        config.channels,
        start as u32,
    )
}

/// Loss counters for one report interval.
#[derive(Default)]
struct Interval {
    expected: u32,
    lost: u32,
}

fn receiver_report(interval: &Interval, cumulative_lost: u32, highest: u16) -> Result<Vec<u8>> {
    let fraction_lost = if interval.expected == 0 {
        0
    } else {
        ((interval.lost * 256) / interval.expected).min(255) as u8
    };
    let report = ReceiverReport {
        ssrc: 2,
        reports: vec![ReceptionReport {
            ssrc: 1,
            fraction_lost,
            total_lost: cumulative_lost,
            last_sequence_number: highest as u32,
            ..Default::default()
        }],
        ..Default::default()
    };
    Ok(report.marshal().context("marshal receiver report")?.to_vec())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
            PipelineConfig::from_json(&json)?
        }
        None => PipelineConfig::default(),
    };
    let audio = config.audio.clone();
    let engine = Arc::new(OpusEngine);
    let sender = AudioSession::new("receiver", &audio, engine.clone(), None)?;
    let receiver = AudioSession::new("sender", &audio, engine, None)?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let loss = (args.loss_percent / 100.0).clamp(0.0, 1.0);
    let frames = args.seconds * 1000 / audio.frame_interval_ms;
    let frames_per_report = (args.report_interval_ms / audio.frame_interval_ms).max(1);

    log::info!(
        "Simulating {frames} frames at {:.1}% loss (bursts up to {})",
        args.loss_percent,
        args.max_burst
    );

    let mut burst_left = 0u32;
    let mut interval = Interval::default();
    let mut cumulative_lost = 0u32;
    let mut highest = 0u16;

    for index in 0..frames {
        let Some(payload) = sender.encode(tone(&audio, index))? else {
            continue;
        };
        for packet in sender.packetize(&payload)? {
            interval.expected += 1;
            if burst_left == 0 && rng.gen_bool(loss) {
                burst_left = rng.gen_range(1..=args.max_burst.max(1));
            }
            if burst_left > 0 {
                burst_left -= 1;
                interval.lost += 1;
                cumulative_lost += 1;
                continue;
            }

            let wire = packet.marshal()?;
            let received = TransportPacket::unmarshal(&wire)?;
            highest = received.sequence_number;
            if let Some(payload) = receiver.depacketize(&received)? {
                receiver.decode(&payload)?;
            }
        }

        if (index + 1) % frames_per_report == 0 {
            let rtcp = receiver_report(&interval, cumulative_lost, highest)?;
            let feedback = Feedback::parse_rtcp(&rtcp)?;
            sender.process_feedback(&feedback)?;
            interval = Interval::default();
        }
    }

    let summary = serde_json::json!({
        "frames": frames,
        "loss_percent": args.loss_percent,
        "packets_lost": cumulative_lost,
        "sender": sender.statistics(),
        "receiver": receiver.statistics(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    sender.destroy();
    receiver.destroy();
    Ok(())
}
