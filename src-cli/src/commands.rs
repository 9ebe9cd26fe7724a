//! Subcommand implementations, generic over the printer transport.

use std::path::Path;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use label_cloud::{CloudClient, CloudLabelInfo};
use niimbot::models::mm_to_px;
use niimbot::{
    InfoKey, NiimbotError, PrintJob, PrinterEvent, PrinterSession, RfidInfo,
    Transport,
};

use crate::config::AppConfig;
use crate::render::{RenderOptions, render};

pub async fn scan<T: Transport>(session: &PrinterSession<T>) -> anyhow::Result<()> {
    let devices = session.scan().await.context("BLE scan failed")?;
    if devices.is_empty() {
        println!("No devices found");
        return Ok(());
    }
    for device in devices {
        println!("{:<24} {:<20} {:>4} dBm", device.name, device.address, device.rssi);
    }
    Ok(())
}

pub async fn info<T: Transport>(
    session: &PrinterSession<T>,
    config: &AppConfig,
    json: bool,
) -> anyhow::Result<()> {
    let device = session
        .connect(&config.model)
        .await
        .with_context(|| format!("could not connect to a {} printer", config.model))?;

    let heartbeat = session.heartbeat().await.context("heartbeat failed")?;
    let rfid = session.get_rfid().await?;
    let mut info = Vec::new();
    for key in InfoKey::ALL {
        match session.get_info(key).await {
            Ok(value) => info.push((key.name(), value.to_string())),
            Err(e) => tracing::warn!(key = key.name(), error = %e, "Info query failed"),
        }
    }
    let cloud = match (&rfid, config.cloud_lookup) {
        (Some(tag), true) => lookup_label(tag).await,
        _ => None,
    };
    session.disconnect().await;

    if json {
        let out = serde_json::json!({
            "device": device,
            "heartbeat": heartbeat,
            "rfid": rfid,
            "info": info
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::from(v.as_str())))
                .collect::<serde_json::Map<_, _>>(),
            "label": cloud,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Device:    {} ({})", device.name, device.address);
    println!(
        "Status:    lid={:?} power={:?} paper={:?} rfid={:?}",
        heartbeat.closing_state, heartbeat.power_level, heartbeat.paper_state, heartbeat.rfid_read_state
    );
    for (name, value) in &info {
        println!("  {name:<20} {value}");
    }
    match &rfid {
        Some(tag) => {
            println!("Label:");
            println!("  Barcode:   {}", tag.barcode);
            println!("  Serial:    {}", tag.serial);
            println!("  Used:      {}/{}", tag.used_len, tag.total_len);
            println!("  Type:      {}", tag.label_type);
        }
        None => println!("Label:     no RFID tag"),
    }
    if let Some(label) = cloud {
        println!(
            "  Catalog:   {} ({}mm x {}mm)",
            label.display_name(),
            label.width_mm,
            label.height_mm
        );
    }
    Ok(())
}

pub struct PrintArgs<'a> {
    pub image: &'a Path,
    pub label: Option<&'a str>,
    pub rotate: bool,
    pub threshold: u8,
}

pub async fn print<T: Transport>(
    session: &PrinterSession<T>,
    config: &AppConfig,
    args: PrintArgs<'_>,
) -> anyhow::Result<()> {
    let img = image::open(args.image)
        .with_context(|| format!("failed to open image {}", args.image.display()))?;
    let profile = config.model_profile();

    session
        .connect(&config.model)
        .await
        .with_context(|| format!("could not connect to a {} printer", config.model))?;

    let label_px = match args.label {
        Some(name) => Some(profile.label_size_px(name).with_context(|| {
            format!(
                "unknown label size {name:?} for {}; known: {:?}",
                profile.name,
                profile.label_sizes.iter().map(|s| s.0).collect::<Vec<_>>()
            )
        })?),
        None => detect_label_px(session, config).await,
    };

    let bitmap = render(
        &img,
        &RenderOptions {
            label_px,
            rotate: args.rotate,
            threshold: args.threshold,
        },
    )?;
    let job = PrintJob::new(bitmap, config.density(), config.quantity, &config.model)?;

    let mut events = session.subscribe_events();
    let (done_tx, mut done_rx) = oneshot::channel::<()>();
    let reporter = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Ok(event) => report_event(event),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
                _ = &mut done_rx => break,
            }
        }
    });

    let result = session.print(&job).await;
    let _ = done_tx.send(());
    let _ = reporter.await;
    session.disconnect().await;

    match result {
        Ok(report) => {
            tracing::info!(copies = report.copies, elapsed_ms = report.elapsed.as_millis() as u64, "Print finished");
            Ok(())
        }
        Err(NiimbotError::Print {
            copies_completed,
            total,
            source,
        }) => {
            let hint = if source.is_link_error() { " (printer disconnected)" } else { "" };
            Err(anyhow::anyhow!(
                "print aborted after {copies_completed} of {total} copies{hint}: {source}"
            ))
        }
        Err(e) => Err(e.into()),
    }
}

fn report_event(event: PrinterEvent) {
    match event {
        PrinterEvent::Progress { copies_done, total } => println!("Printed {copies_done}/{total}"),
        PrinterEvent::Error { message } => eprintln!("Printer error: {message}"),
        _ => {}
    }
}

/// Label size from the roll's tag via the cloud catalogue, if available.
async fn detect_label_px<T: Transport>(
    session: &PrinterSession<T>,
    config: &AppConfig,
) -> Option<(u32, u32)> {
    if !config.cloud_lookup {
        return None;
    }
    let tag = session.get_rfid().await.ok().flatten()?;
    let label = lookup_label(&tag).await?;
    let size = label_dots(&label);
    if size.is_none() {
        tracing::warn!(
            width_mm = label.width_mm,
            height_mm = label.height_mm,
            "Catalogue label size is unusable, printing at image size"
        );
    } else {
        tracing::info!(name = label.display_name(), "Sizing image to loaded label");
    }
    size
}

/// Printable size of a catalogue label, `None` when either side rounds to
/// zero dots.
fn label_dots(label: &CloudLabelInfo) -> Option<(u32, u32)> {
    let (w, h) = (mm_to_px(label.width_mm), mm_to_px(label.height_mm));
    (w > 0 && h > 0).then_some((w, h))
}

async fn lookup_label(tag: &RfidInfo) -> Option<CloudLabelInfo> {
    let client = match CloudClient::new() {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "Cloud client unavailable");
            return None;
        }
    };
    match client.get_label_by_barcode(&tag.barcode).await {
        Ok(label) => label,
        Err(e) => {
            tracing::warn!(barcode = %tag.barcode, error = %e, "Cloud label lookup failed");
            None
        }
    }
}
