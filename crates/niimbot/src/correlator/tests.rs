use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::command::Command;
use crate::models::ModelProfile;
use crate::sim::SimulatedPrinter;

async fn attached(sim: &SimulatedPrinter, retry: RetryPolicy) -> Arc<Correlator<SimulatedPrinter>> {
    let device = sim.scan(Duration::ZERO).await.unwrap().remove(0);
    sim.connect(&device, &ModelProfile::lookup("d110").gatt)
        .await
        .unwrap();
    let corr = Correlator::new(sim.clone(), retry);
    corr.attach(sim.subscribe().await.unwrap());
    Arc::new(corr)
}

async fn wait_for_sent<T: Transport>(corr: &Correlator<T>, command: u8) {
    for _ in 0..200 {
        if corr.phase() == Phase::Sent(command) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("command 0x{command:02x} never became pending");
}

fn heartbeat() -> Packet {
    Command::Heartbeat.packet(vec![0x01]).unwrap()
}

#[tokio::test]
async fn resolves_matching_reply() {
    let sim = SimulatedPrinter::dry_run("d110");
    let corr = attached(&sim, RetryPolicy::none()).await;

    let reply = corr
        .submit(
            Command::SetLabelDensity.packet(vec![3]).unwrap(),
            0x31,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    assert_eq!(reply.command, 0x31);
    assert_eq!(reply.payload, vec![0x01]);
    assert_eq!(corr.phase(), Phase::Idle);
}

#[tokio::test]
async fn second_submit_is_busy_while_pending() {
    let sim = SimulatedPrinter::dry_run("d110");
    sim.silence(0xdc);
    let corr = attached(&sim, RetryPolicy::none()).await;

    let first = {
        let corr = Arc::clone(&corr);
        tokio::spawn(async move {
            corr.submit(heartbeat(), 0xdd, Duration::from_millis(300))
                .await
        })
    };
    wait_for_sent(&corr, 0xdc).await;

    let second = corr
        .submit(
            Command::GetRfid.packet(vec![0x01]).unwrap(),
            0x1b,
            Duration::from_secs(1),
        )
        .await;
    assert!(matches!(second, Err(NiimbotError::Busy { pending: 0xdc })));

    let row = Command::PrintEmptyRow.packet(vec![0, 0, 1]).unwrap();
    assert!(matches!(
        corr.send(&row, Duration::from_secs(1)).await,
        Err(NiimbotError::Busy { pending: 0xdc })
    ));

    let first = first.await.unwrap();
    assert!(matches!(first, Err(NiimbotError::Timeout { command: 0xdc, .. })));

    // Slot is free again once the first exchange resolved.
    let third = corr
        .submit(
            Command::SetLabelType.packet(vec![1]).unwrap(),
            0x33,
            Duration::from_secs(1),
        )
        .await;
    assert!(third.is_ok());
}

#[tokio::test]
async fn timeout_frees_the_slot() {
    let sim = SimulatedPrinter::dry_run("d110");
    sim.silence(0xdc);
    let corr = attached(&sim, RetryPolicy::none()).await;

    let err = corr
        .submit(heartbeat(), 0xdd, Duration::from_millis(30))
        .await
        .unwrap_err();
    match err {
        NiimbotError::Timeout { command, elapsed } => {
            assert_eq!(command, 0xdc);
            assert!(elapsed >= Duration::from_millis(30));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(corr.phase(), Phase::Idle);
}

#[tokio::test]
async fn link_drop_resolves_pending_with_link_error() {
    let sim = SimulatedPrinter::dry_run("d110");
    sim.silence(0xdc);
    let corr = attached(&sim, RetryPolicy::none()).await;

    let pending = {
        let corr = Arc::clone(&corr);
        tokio::spawn(async move { corr.submit(heartbeat(), 0xdd, Duration::from_secs(30)).await })
    };
    wait_for_sent(&corr, 0xdc).await;

    sim.drop_link();
    let result = tokio::time::timeout(Duration::from_millis(200), pending)
        .await
        .expect("pending exchange must resolve promptly")
        .unwrap();
    assert!(matches!(result, Err(NiimbotError::LinkLost { command: 0xdc })));
    assert_eq!(corr.phase(), Phase::Closed);

    let after = corr.submit(heartbeat(), 0xdd, Duration::from_secs(1)).await;
    assert!(matches!(after, Err(NiimbotError::NotConnected)));
}

#[tokio::test]
async fn close_resolves_pending_with_link_error() {
    let sim = SimulatedPrinter::dry_run("d110");
    sim.silence(0xdc);
    let corr = attached(&sim, RetryPolicy::none()).await;

    let pending = {
        let corr = Arc::clone(&corr);
        tokio::spawn(async move { corr.submit(heartbeat(), 0xdd, Duration::from_secs(30)).await })
    };
    wait_for_sent(&corr, 0xdc).await;

    corr.close();
    let result = tokio::time::timeout(Duration::from_millis(200), pending)
        .await
        .expect("pending exchange must resolve promptly")
        .unwrap();
    assert!(matches!(result, Err(NiimbotError::LinkLost { command: 0xdc })));
}

#[tokio::test]
async fn corrupt_and_foreign_frames_are_ignored() {
    let sim = SimulatedPrinter::dry_run("d110");
    sim.silence(0x1a);
    let corr = attached(&sim, RetryPolicy::none()).await;

    let pending = {
        let corr = Arc::clone(&corr);
        tokio::spawn(async move {
            corr.submit(
                Command::GetRfid.packet(vec![0x01]).unwrap(),
                0x1b,
                Duration::from_secs(2),
            )
            .await
        })
    };
    wait_for_sent(&corr, 0x1a).await;

    let mut corrupt = Packet::new(0x1b, vec![0x07]).unwrap().encode();
    let checksum_at = corrupt.len() - 3;
    corrupt[checksum_at] ^= 0x01;
    sim.inject(corrupt);
    sim.inject(vec![0x01, 0x02, 0x03]);
    sim.inject(Packet::new(0x31, vec![0x01]).unwrap().encode());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(corr.phase(), Phase::Sent(0x1a));

    sim.inject(Packet::new(0x1b, vec![0x00]).unwrap().encode());
    let reply = pending.await.unwrap().unwrap();
    assert_eq!(reply.command, 0x1b);
    assert_eq!(reply.payload, vec![0x00]);
}

#[tokio::test]
async fn error_reply_rejects_the_command() {
    let sim = SimulatedPrinter::dry_run("d110");
    sim.silence(0x21);
    let corr = attached(&sim, RetryPolicy::none()).await;

    let pending = {
        let corr = Arc::clone(&corr);
        tokio::spawn(async move {
            corr.submit(
                Command::SetLabelDensity.packet(vec![9]).unwrap(),
                0x31,
                Duration::from_secs(2),
            )
            .await
        })
    };
    wait_for_sent(&corr, 0x21).await;
    sim.inject(Packet::new(ERROR_REPLY, vec![0x05]).unwrap().encode());

    let result = pending.await.unwrap();
    assert!(matches!(
        result,
        Err(NiimbotError::Rejected {
            command: 0x21,
            code: 0x05
        })
    ));
}

#[tokio::test]
async fn submit_without_link_is_not_connected() {
    let sim = SimulatedPrinter::dry_run("d110");
    let corr = Correlator::new(sim.clone(), RetryPolicy::none());
    assert_eq!(corr.phase(), Phase::Closed);
    let result = corr.submit(heartbeat(), 0xdd, Duration::from_secs(1)).await;
    assert!(matches!(result, Err(NiimbotError::NotConnected)));
    assert!(sim.frames().is_empty());
}

#[tokio::test]
async fn transient_write_failure_is_retried_once() {
    let sim = SimulatedPrinter::dry_run("d110");
    let retry = RetryPolicy {
        attempts: 2,
        backoff: Duration::from_millis(1),
    };
    let corr = attached(&sim, retry).await;

    sim.fail_next_writes(1);
    let reply = corr
        .submit(heartbeat(), 0xdd, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(reply.command, 0xdd);

    sim.fail_next_writes(2);
    let err = corr
        .submit(heartbeat(), 0xdd, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, NiimbotError::BleWrite(_)));
    assert_eq!(corr.phase(), Phase::Idle);
}

#[tokio::test]
async fn stalled_write_counts_against_the_deadline() {
    let sim = SimulatedPrinter::dry_run("d110");
    sim.stall_writes(0xdc);
    let corr = attached(&sim, RetryPolicy::none()).await;

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        corr.submit(heartbeat(), 0xdd, Duration::from_millis(50)),
    )
    .await
    .expect("stalled write must hit the command deadline");
    assert!(matches!(result, Err(NiimbotError::Timeout { command: 0xdc, .. })));
    assert_eq!(corr.phase(), Phase::Idle);
}

#[tokio::test]
async fn close_resolves_a_stalled_write() {
    let sim = SimulatedPrinter::dry_run("d110");
    sim.stall_writes(0xdc);
    let corr = attached(&sim, RetryPolicy::none()).await;

    let pending = {
        let corr = Arc::clone(&corr);
        tokio::spawn(async move { corr.submit(heartbeat(), 0xdd, Duration::from_secs(30)).await })
    };
    wait_for_sent(&corr, 0xdc).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    corr.close();
    let result = tokio::time::timeout(Duration::from_millis(200), pending)
        .await
        .expect("close must resolve the stalled exchange")
        .unwrap();
    assert!(matches!(result, Err(NiimbotError::LinkLost { command: 0xdc })));
}

#[tokio::test]
async fn stalled_row_send_times_out() {
    let sim = SimulatedPrinter::dry_run("d110");
    sim.stall_writes(0x84);
    let corr = attached(&sim, RetryPolicy::none()).await;

    let row = Command::PrintEmptyRow.packet(vec![0, 0, 1]).unwrap();
    let result = tokio::time::timeout(
        Duration::from_secs(1),
        corr.send(&row, Duration::from_millis(50)),
    )
    .await
    .expect("row send must honour its deadline");
    assert!(matches!(result, Err(NiimbotError::Timeout { command: 0x84, .. })));
    assert_eq!(corr.phase(), Phase::Idle);
}

#[tokio::test]
async fn link_drop_resolves_a_stalled_row_send() {
    let sim = SimulatedPrinter::dry_run("d110");
    sim.stall_writes(0x84);
    let corr = attached(&sim, RetryPolicy::none()).await;

    let sending = {
        let corr = Arc::clone(&corr);
        tokio::spawn(async move {
            let row = Command::PrintEmptyRow.packet(vec![0, 0, 1]).unwrap();
            corr.send(&row, Duration::from_secs(30)).await
        })
    };
    for _ in 0..200 {
        if sim.commands().contains(&0x84) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    sim.drop_link();
    let result = tokio::time::timeout(Duration::from_millis(200), sending)
        .await
        .expect("link drop must resolve the stalled send")
        .unwrap();
    assert!(matches!(result, Err(NiimbotError::LinkLost { command: 0x84 })));
}
