use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use quickrtc::*;
use tokio::sync::mpsc;

async fn wait_for<F: FnMut() -> bool>(mut f: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    f()
}

/// Buffers trickled candidates on both sides, exchanges offer/answer, then
/// forwards the buffered (and subsequent) candidates.
async fn connect_pair(
    offerer: &Arc<RTCPeerConnection>,
    answerer: &Arc<RTCPeerConnection>,
    tamper_offer: Option<Box<dyn Fn(String) -> String + Send>>,
) -> Result<()> {
    let (offer_tx, mut offer_rx) = mpsc::unbounded_channel();
    offerer.on_ice_candidate(Box::new(move |candidate| {
        let _ = offer_tx.send(candidate);
    }));
    let (answer_tx, mut answer_rx) = mpsc::unbounded_channel();
    answerer.on_ice_candidate(Box::new(move |candidate| {
        let _ = answer_tx.send(candidate);
    }));

    let mut offer = offerer.create_offer()?;
    offerer.set_local_description(offer.clone())?;
    if let Some(tamper) = tamper_offer {
        offer.sdp = tamper(offer.sdp);
    }
    answerer.set_remote_description(offer)?;

    let answer = answerer.create_answer()?;
    answerer.set_local_description(answer.clone())?;
    offerer.set_remote_description(answer)?;

    // both descriptions applied; now the buffered candidates can flow
    let answerer_clone = answerer.clone();
    tokio::spawn(async move {
        while let Some(candidate) = offer_rx.recv().await {
            match candidate {
                Some(candidate) => {
                    let _ = answerer_clone.add_ice_candidate(candidate);
                }
                None => break,
            }
        }
    });
    let offerer_clone = offerer.clone();
    tokio::spawn(async move {
        while let Some(candidate) = answer_rx.recv().await {
            match candidate {
                Some(candidate) => {
                    let _ = offerer_clone.add_ice_candidate(candidate);
                }
                None => break,
            }
        }
    });

    Ok(())
}

#[tokio::test]
async fn test_loopback_data_channel() -> Result<()> {
    let offerer = RTCPeerConnection::new(RTCConfiguration::default()).await?;
    let answerer = RTCPeerConnection::new(RTCConfiguration::default()).await?;

    let received: Arc<Mutex<Option<Bytes>>> = Arc::new(Mutex::new(None));
    let remote_label: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    {
        let received = received.clone();
        let remote_label = remote_label.clone();
        answerer.on_data_channel(Box::new(move |channel| {
            *remote_label.lock().unwrap() = Some(channel.label().to_owned());
            let received = received.clone();
            channel.on_message(Box::new(move |msg| {
                *received.lock().unwrap() = Some(msg.data);
            }));
        }));
    }

    let channel = offerer.create_data_channel(
        "t",
        Some(RTCDataChannelInit {
            ordered: false,
            ..Default::default()
        }),
    )?;

    connect_pair(&offerer, &answerer, None).await?;

    assert!(
        wait_for(
            || channel.ready_state() == RTCDataChannelState::Open,
            Duration::from_secs(5),
        )
        .await,
        "offerer channel should open",
    );
    assert_eq!(
        remote_label.lock().unwrap().as_deref(),
        Some("t"),
        "answerer should see the channel label",
    );

    channel.send(&Bytes::from_static(&[0x01, 0x02, 0x03]))?;

    assert!(
        wait_for(
            || received.lock().unwrap().is_some(),
            Duration::from_secs(2),
        )
        .await,
        "payload should arrive within 2s",
    );
    assert_eq!(
        received.lock().unwrap().as_deref(),
        Some(&[0x01u8, 0x02, 0x03][..]),
    );

    offerer.close()?;
    answerer.close()?;
    Ok(())
}

#[tokio::test]
async fn test_fingerprint_mismatch_fails() -> Result<()> {
    let offerer = RTCPeerConnection::new(RTCConfiguration::default()).await?;
    let answerer = RTCPeerConnection::new(RTCConfiguration::default()).await?;

    let got_channel = Arc::new(AtomicBool::new(false));
    {
        let got_channel = got_channel.clone();
        answerer.on_data_channel(Box::new(move |_| {
            got_channel.store(true, Ordering::SeqCst);
        }));
    }

    let _channel = offerer.create_data_channel("t", None)?;

    // fabricate a fingerprint that cannot match the offerer's certificate
    let tamper: Box<dyn Fn(String) -> String + Send> = Box::new(|sdp: String| {
        let bogus = "00:".repeat(31) + "00";
        sdp.lines()
            .map(|line| {
                if line.starts_with("a=fingerprint:sha-256 ") {
                    format!("a=fingerprint:sha-256 {bogus}")
                } else {
                    line.to_owned()
                }
            })
            .collect::<Vec<_>>()
            .join("\r\n")
            + "\r\n"
    });

    connect_pair(&offerer, &answerer, Some(tamper)).await?;

    assert!(
        wait_for(
            || answerer.connection_state() == RTCPeerConnectionState::Failed,
            Duration::from_secs(10),
        )
        .await,
        "answerer should fail on fingerprint mismatch",
    );
    assert!(
        !got_channel.load(Ordering::SeqCst),
        "no data channel may surface on a failed transport",
    );

    offerer.close()?;
    answerer.close()?;
    Ok(())
}

#[tokio::test]
async fn test_answer_media_mismatch_rejected() -> Result<()> {
    let offerer = RTCPeerConnection::new(RTCConfiguration::default()).await?;
    let answerer = RTCPeerConnection::new(RTCConfiguration::default()).await?;

    let _channel = offerer.create_data_channel("t", None)?;

    let offer = offerer.create_offer()?;
    offerer.set_local_description(offer.clone())?;
    answerer.set_remote_description(offer)?;

    let mut answer = answerer.create_answer()?;
    answerer.set_local_description(answer.clone())?;

    // the answerer responds with an audio section instead of application
    answer.sdp = answer.sdp.replace("m=application", "m=audio");

    let result = offerer.set_remote_description(answer);
    assert!(
        matches!(result, Err(Error::ErrInvalidSdp(_))),
        "mismatched answer must be rejected as invalid sdp",
    );
    // the failed call left the signaling state unchanged
    assert_eq!(
        offerer.signaling_state(),
        RTCSignalingState::HaveLocalOffer,
    );

    offerer.close()?;
    answerer.close()?;
    Ok(())
}

#[tokio::test]
async fn test_oversize_send_rejected_then_mtu_payload_delivered() -> Result<()> {
    let offerer = RTCPeerConnection::new(RTCConfiguration::default()).await?;
    let answerer = RTCPeerConnection::new(RTCConfiguration::default()).await?;

    let received_len: Arc<Mutex<Option<usize>>> = Arc::new(Mutex::new(None));
    {
        let received_len = received_len.clone();
        answerer.on_data_channel(Box::new(move |channel| {
            let received_len = received_len.clone();
            channel.on_message(Box::new(move |msg| {
                *received_len.lock().unwrap() = Some(msg.data.len());
            }));
        }));
    }

    let channel = offerer.create_data_channel(
        "bulk",
        Some(RTCDataChannelInit {
            ordered: false,
            ..Default::default()
        }),
    )?;

    connect_pair(&offerer, &answerer, None).await?;
    assert!(
        wait_for(
            || channel.ready_state() == RTCDataChannelState::Open,
            Duration::from_secs(5),
        )
        .await,
    );

    // 1201 bytes fails synchronously
    let result = channel.send(&Bytes::from(vec![0u8; 1201]));
    assert!(matches!(result, Err(Error::ErrPayloadTooLarge)));

    // a subsequent 1200-byte send succeeds and is delivered
    channel.send(&Bytes::from(vec![0u8; 1200]))?;
    assert!(
        wait_for(
            || *received_len.lock().unwrap() == Some(1200),
            Duration::from_secs(2),
        )
        .await,
        "the 1200-byte payload should be delivered",
    );

    offerer.close()?;
    answerer.close()?;
    Ok(())
}

#[tokio::test]
async fn test_graceful_close_propagates() -> Result<()> {
    let offerer = RTCPeerConnection::new(RTCConfiguration::default()).await?;
    let answerer = RTCPeerConnection::new(RTCConfiguration::default()).await?;

    let channel = offerer.create_data_channel("t", None)?;
    connect_pair(&offerer, &answerer, None).await?;
    assert!(
        wait_for(
            || channel.ready_state() == RTCDataChannelState::Open,
            Duration::from_secs(5),
        )
        .await,
    );

    offerer.close()?;
    // close is idempotent
    offerer.close()?;

    assert!(
        wait_for(
            || offerer.connection_state() == RTCPeerConnectionState::Closed
                && answerer.connection_state() == RTCPeerConnectionState::Closed,
            Duration::from_secs(1),
        )
        .await,
        "both peers should observe closed within 1s",
    );
    Ok(())
}

#[tokio::test]
async fn test_signaling_state_table_enforced() -> Result<()> {
    let pc = RTCPeerConnection::new(RTCConfiguration::default()).await?;
    assert_eq!(pc.signaling_state(), RTCSignalingState::Stable);

    // an answer cannot be applied in stable; the state is unchanged
    let bogus = RTCSessionDescription {
        sdp_type: RTCSdpType::Answer,
        sdp: "v=0\r\no=- 1 2 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n".to_owned(),
    };
    assert!(matches!(
        pc.set_local_description(bogus.clone()),
        Err(Error::ErrIncorrectSignalingState),
    ));
    assert!(matches!(
        pc.set_remote_description(bogus),
        Err(Error::ErrIncorrectSignalingState),
    ));
    assert_eq!(pc.signaling_state(), RTCSignalingState::Stable);

    // offers are fine from stable, twice in a row even
    let offer = pc.create_offer()?;
    pc.set_local_description(offer.clone())?;
    assert_eq!(pc.signaling_state(), RTCSignalingState::HaveLocalOffer);
    pc.set_local_description(offer)?;
    assert_eq!(pc.signaling_state(), RTCSignalingState::HaveLocalOffer);

    pc.close()?;
    Ok(())
}

#[tokio::test]
async fn test_create_answer_requires_remote_description() -> Result<()> {
    let pc = RTCPeerConnection::new(RTCConfiguration::default()).await?;
    assert!(matches!(
        pc.create_answer(),
        Err(Error::ErrNoRemoteDescription),
    ));
    pc.close()?;
    Ok(())
}

#[tokio::test]
async fn test_operations_fail_after_close() -> Result<()> {
    let pc = RTCPeerConnection::new(RTCConfiguration::default()).await?;
    pc.close()?;

    assert!(matches!(pc.create_offer(), Err(Error::ErrConnectionClosed)));
    assert!(matches!(
        pc.create_data_channel("t", None),
        Err(Error::ErrConnectionClosed),
    ));
    assert_eq!(pc.connection_state(), RTCPeerConnectionState::Closed);
    assert_eq!(pc.signaling_state(), RTCSignalingState::Closed);
    Ok(())
}
