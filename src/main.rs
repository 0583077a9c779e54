// src/main.rs

use anyhow::{Context, Result};
use road_speed_monitor::detection::MotionDetector;
use road_speed_monitor::frame_source::FrameSource;
use road_speed_monitor::geometry::CoordinateMapper;
use road_speed_monitor::opencv_camera::OpenCvCamera;
use road_speed_monitor::pipeline::{MetricsSummary, MonitorEvent, TrafficMonitor};
use road_speed_monitor::speed::SpeedEngine;
use road_speed_monitor::types::Config;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("road_speed_monitor={}", config.logging.level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚗 Road Speed Monitor starting");
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Speed limit {} km/h, plausible range {}-{} km/h, trigger threshold {} px",
        config.speed.speed_limit_kmh,
        config.speed.min_reasonable_kmh,
        config.speed.max_reasonable_kmh,
        config.speed.trigger_threshold_px
    );

    let mapper = Arc::new(CoordinateMapper::load(&config).context("calibration")?);
    info!("✓ Coordinate mapper ready");

    let camera = OpenCvCamera::new(&config.camera);
    let mut source = FrameSource::new(Box::new(camera), &config.camera);
    source.start().context("starting frame source")?;
    info!(
        "✓ Frame source running ({}x{} @ {} FPS, buffer {} frames)",
        config.camera.width, config.camera.height, config.camera.fps, config.camera.buffer_size
    );

    let detector = MotionDetector::new(&config.detection, Arc::clone(&mapper))
        .context("building motion detector")?;
    let engine = SpeedEngine::new(&config.speed, mapper);
    let mut monitor =
        TrafficMonitor::new(source.reader(), Box::new(detector), engine, &config.monitor);
    let shutdown = monitor.shutdown_handle();
    let mut worker = tokio::task::spawn_blocking(move || monitor.run(present));

    // The loop only returns on shutdown, so finishing first means it died
    let finished_early = tokio::select! {
        joined = &mut worker => Some(joined),
        _ = shutdown_signal() => None,
    };
    let joined = match finished_early {
        Some(joined) => {
            error!("❌ Processing loop stopped without a shutdown request");
            joined
        }
        None => {
            shutdown.store(true, Ordering::Relaxed);
            worker.await
        }
    };

    if let Err(e) = source.stop() {
        error!("Frame source did not stop cleanly: {}", e);
    }
    let summary = joined.context("processing loop panicked")?;

    print_summary(&summary);
    Ok(())
}

/// Presentation side of the event bus.
fn present(event: MonitorEvent) {
    match event {
        MonitorEvent::SpeedMeasured(speed) => match serde_json::to_string(&speed) {
            Ok(json) => info!("{}", json),
            Err(e) => warn!("Could not serialize speed event: {}", e),
        },
        MonitorEvent::VehicleEntered {
            vehicle_number,
            line,
            timestamp,
        } => debug!(
            "Vehicle #{} entered at {} ({:.2}s)",
            vehicle_number,
            line.as_str(),
            timestamp
        ),
        MonitorEvent::MeasurementDiscarded {
            vehicle_number,
            anomaly,
            timestamp,
        } => debug!(
            "Vehicle #{} discarded at {:.2}s: {}",
            vehicle_number, timestamp, anomaly
        ),
    }
}

fn print_summary(summary: &MetricsSummary) {
    info!("\n========================================");
    info!("✓ Monitoring stopped after {:.1}s", summary.elapsed_secs);
    info!(
        "  Frames processed: {} ({:.1} FPS)",
        summary.frames_processed, summary.fps
    );
    info!(
        "  Frames with motion: {} ({:.1}%)",
        summary.frames_with_detections,
        100.0 * summary.frames_with_detections as f64 / summary.frames_processed.max(1) as f64
    );
    info!("  Vehicles started: {}", summary.vehicles_started);
    info!("  ✅ Speed events: {}", summary.speed_events);
    info!("  ⚠️  Speeding: {}", summary.speeding_events);
    info!("  Discarded measurements: {}", summary.discarded_measurements);
    if summary.processing_faults > 0 {
        warn!("  Frames skipped after faults: {}", summary.processing_faults);
    }
    info!("========================================\n");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        }
    }
}
