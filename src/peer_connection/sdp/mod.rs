pub mod sdp_type;
pub mod session_description;

use ice::candidate::Candidate;
use sdp::description::common::{Attribute, ConnectionInformation};
use sdp::description::media::{MediaDescription, MediaName};
use sdp::description::session::*;

use crate::dtls_transport::dtls_fingerprint::RTCDtlsFingerprint;
use crate::error::{Error, Result};
use crate::peer_connection::policy::bundle_policy::RTCBundlePolicy;

pub(crate) const MEDIA_SECTION_APPLICATION: &str = "application";
pub(crate) const SDP_PROTO_DTLS_SCTP: [&str; 3] = ["UDP", "DTLS", "SCTP"];
pub(crate) const SDP_FORMAT_DATACHANNEL: &str = "webrtc-datachannel";
pub(crate) const DEFAULT_MID: &str = "0";

/// The negotiation-relevant contents of a remote session description.
#[derive(Debug, Default)]
pub(crate) struct RemoteDescriptionSummary {
    pub(crate) ice_ufrag: String,
    pub(crate) ice_pwd: String,
    pub(crate) ice_lite: bool,
    pub(crate) fingerprints: Vec<RTCDtlsFingerprint>,
    pub(crate) setup: Option<String>,
    pub(crate) sctp_port: u16,
    pub(crate) max_message_size: u32,
    pub(crate) candidates: Vec<Candidate>,
    pub(crate) end_of_candidates: bool,
}

/// populate_session_description builds the single-section description this
/// profile negotiates.
#[allow(clippy::too_many_arguments)]
pub(crate) fn create_session_description(
    ice_ufrag: &str,
    ice_pwd: &str,
    fingerprints: &[RTCDtlsFingerprint],
    setup: &str,
    candidates: &[Candidate],
    gathering_complete: bool,
    bundle_policy: RTCBundlePolicy,
    sctp_port: u16,
    max_message_size: u32,
) -> SessionDescription {
    let mut sd = SessionDescription {
        version: 0,
        origin: Origin::new(),
        session_name: "-".to_owned(),
        connection_information: None,
        time_descriptions: vec![Timing::default()],
        attributes: vec![],
        media_descriptions: vec![],
    };

    if bundle_policy != RTCBundlePolicy::Disable {
        sd = sd.with_value_attribute(ATTR_KEY_GROUP.to_owned(), format!("BUNDLE {DEFAULT_MID}"));
    }
    sd = sd
        .with_property_attribute(ATTR_KEY_EXTMAP_ALLOW_MIXED.to_owned())
        .with_value_attribute(ATTR_KEY_MSID_SEMANTIC.to_owned(), " WMS".to_owned());
    for fingerprint in fingerprints {
        sd = sd.with_value_attribute(ATTR_KEY_FINGERPRINT.to_owned(), fingerprint.to_string());
    }

    let mut media = MediaDescription {
        media_name: MediaName {
            media: MEDIA_SECTION_APPLICATION.to_owned(),
            port: 9,
            protos: SDP_PROTO_DTLS_SCTP.iter().map(|s| (*s).to_owned()).collect(),
            formats: vec![SDP_FORMAT_DATACHANNEL.to_owned()],
        },
        connection_information: Some(ConnectionInformation {
            network_type: "IN".to_owned(),
            address_type: "IP4".to_owned(),
            address: Some("0.0.0.0".to_owned()),
        }),
        attributes: vec![],
    }
    .with_value_attribute(ATTR_KEY_ICEUFRAG.to_owned(), ice_ufrag.to_owned())
    .with_value_attribute(ATTR_KEY_ICEPWD.to_owned(), ice_pwd.to_owned())
    .with_value_attribute(ATTR_KEY_ICEOPTIONS.to_owned(), "trickle".to_owned())
    .with_value_attribute(ATTR_KEY_SETUP.to_owned(), setup.to_owned())
    .with_value_attribute(ATTR_KEY_MID.to_owned(), DEFAULT_MID.to_owned())
    .with_value_attribute(ATTR_KEY_SCTP_PORT.to_owned(), sctp_port.to_string())
    .with_value_attribute(
        ATTR_KEY_MAX_MESSAGE_SIZE.to_owned(),
        max_message_size.to_string(),
    );

    for candidate in candidates {
        media = media.with_value_attribute(ATTR_KEY_CANDIDATE.to_owned(), candidate.marshal());
    }
    if gathering_complete {
        media = media.with_property_attribute(ATTR_KEY_END_OF_CANDIDATES.to_owned());
    }

    sd.with_media(media)
}

/// summarize_remote_description extracts and validates everything the
/// transports need from a remote description.
pub(crate) fn summarize_remote_description(
    sd: &SessionDescription,
) -> Result<RemoteDescriptionSummary> {
    let media = sd
        .media_descriptions
        .iter()
        .find(|m| m.media_name.media == MEDIA_SECTION_APPLICATION)
        .ok_or_else(|| Error::ErrInvalidSdp("no application media section".to_owned()))?;

    // kind == application implies the data-channel profile
    if media.media_name.protos != SDP_PROTO_DTLS_SCTP {
        return Err(Error::ErrInvalidSdp(format!(
            "unexpected profile {}",
            media.media_name.protos.join("/"),
        )));
    }

    // media-level attributes override / inherit from session level
    let lookup = |key: &str| -> Option<String> {
        media
            .attribute(key)
            .flatten()
            .or_else(|| sd.attribute(key).flatten())
            .map(|s| s.to_owned())
    };

    let ice_ufrag = lookup(ATTR_KEY_ICEUFRAG)
        .ok_or_else(|| Error::ErrInvalidSdp("missing ice-ufrag".to_owned()))?;
    let ice_pwd = lookup(ATTR_KEY_ICEPWD)
        .ok_or_else(|| Error::ErrInvalidSdp("missing ice-pwd".to_owned()))?;

    let mut fingerprints = vec![];
    for attributes in [&sd.attributes, &media.attributes] {
        for a in attributes {
            if a.key == ATTR_KEY_FINGERPRINT {
                if let Some(fingerprint) =
                    a.value.as_deref().and_then(RTCDtlsFingerprint::parse)
                {
                    fingerprints.push(fingerprint);
                }
            }
        }
    }
    if fingerprints.is_empty() {
        return Err(Error::ErrSessionDescriptionNoFingerprint);
    }

    let sctp_port = lookup(ATTR_KEY_SCTP_PORT)
        .and_then(|v| v.parse().ok())
        .unwrap_or(sctp::DEFAULT_SCTP_PORT);
    let max_message_size = lookup(ATTR_KEY_MAX_MESSAGE_SIZE)
        .and_then(|v| v.parse().ok())
        .unwrap_or(sctp::DEFAULT_MAX_MESSAGE_SIZE);

    let mut candidates = vec![];
    for a in &media.attributes {
        if a.key == ATTR_KEY_CANDIDATE {
            if let Some(value) = &a.value {
                if let Ok(candidate) = Candidate::unmarshal(value) {
                    candidates.push(candidate);
                }
            }
        }
    }

    Ok(RemoteDescriptionSummary {
        ice_ufrag,
        ice_pwd,
        ice_lite: sd.has_attribute(ATTR_KEY_ICELITE) || media.has_attribute(ATTR_KEY_ICELITE),
        fingerprints,
        setup: lookup(ATTR_KEY_SETUP),
        sctp_port,
        max_message_size,
        candidates,
        end_of_candidates: media.has_attribute(ATTR_KEY_END_OF_CANDIDATES),
    })
}

/// validate_answer_matches_offer enforces that the ordered sequence of
/// (kind, index) media sections in the answer equals the pending offer's.
pub(crate) fn validate_answer_matches_offer(
    offer: &SessionDescription,
    answer: &SessionDescription,
) -> Result<()> {
    let kinds = |sd: &SessionDescription| -> Vec<(String, usize)> {
        sd.media_descriptions
            .iter()
            .enumerate()
            .map(|(idx, m)| (m.media_name.media.clone(), idx))
            .collect()
    };

    let offer_kinds = kinds(offer);
    let answer_kinds = kinds(answer);
    if offer_kinds != answer_kinds {
        return Err(Error::ErrInvalidSdp(format!(
            "answer media sections {answer_kinds:?} do not match offer {offer_kinds:?}",
        )));
    }
    Ok(())
}

pub(crate) fn attribute_value(attributes: &[Attribute], key: &str) -> Option<String> {
    attributes
        .iter()
        .find(|a| a.key == key)
        .and_then(|a| a.value.clone())
}

#[cfg(test)]
mod sdp_test {
    use super::*;

    fn fingerprint() -> RTCDtlsFingerprint {
        RTCDtlsFingerprint {
            algorithm: "sha-256".to_owned(),
            value: "aa:bb:cc".to_owned(),
        }
    }

    #[test]
    fn test_create_description_round_trips() -> Result<()> {
        let sd = create_session_description(
            "someufrag",
            "somepassword",
            &[fingerprint()],
            "actpass",
            &[Candidate::host("127.0.0.1".to_owned(), 4000)],
            true,
            RTCBundlePolicy::MaxBundle,
            5000,
            1200,
        );
        let marshaled = sd.marshal();
        let reparsed = SessionDescription::unmarshal(&marshaled)?;
        assert_eq!(reparsed.marshal(), marshaled);
        Ok(())
    }

    #[test]
    fn test_summarize_remote_description() -> Result<()> {
        let sd = create_session_description(
            "someufrag",
            "somepassword",
            &[fingerprint()],
            "actpass",
            &[Candidate::host("127.0.0.1".to_owned(), 4000)],
            true,
            RTCBundlePolicy::MaxBundle,
            5000,
            1200,
        );
        let summary = summarize_remote_description(&sd)?;
        assert_eq!(summary.ice_ufrag, "someufrag");
        assert_eq!(summary.ice_pwd, "somepassword");
        assert_eq!(summary.fingerprints, vec![fingerprint()]);
        assert_eq!(summary.setup.as_deref(), Some("actpass"));
        assert_eq!(summary.sctp_port, 5000);
        assert_eq!(summary.max_message_size, 1200);
        assert_eq!(summary.candidates.len(), 1);
        assert!(summary.end_of_candidates);
        assert!(!summary.ice_lite);
        Ok(())
    }

    #[test]
    fn test_summarize_rejects_wrong_profile() {
        let raw = "v=0\r\no=- 1 2 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n\
m=application 9 UDP/TLS/RTP/SAVPF 111\r\n";
        let sd = SessionDescription::unmarshal(raw).unwrap();
        assert!(matches!(
            summarize_remote_description(&sd),
            Err(Error::ErrInvalidSdp(_))
        ));
    }

    #[test]
    fn test_summarize_requires_fingerprint() {
        let raw = "v=0\r\no=- 1 2 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n\
m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
a=ice-ufrag:u\r\na=ice-pwd:p\r\n";
        let sd = SessionDescription::unmarshal(raw).unwrap();
        assert!(matches!(
            summarize_remote_description(&sd),
            Err(Error::ErrSessionDescriptionNoFingerprint)
        ));
    }

    #[test]
    fn test_validate_answer_media_mismatch() {
        let offer_raw = "v=0\r\no=- 1 2 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n\
m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n";
        let answer_raw = "v=0\r\no=- 1 2 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";
        let offer = SessionDescription::unmarshal(offer_raw).unwrap();
        let answer = SessionDescription::unmarshal(answer_raw).unwrap();
        assert!(matches!(
            validate_answer_matches_offer(&offer, &answer),
            Err(Error::ErrInvalidSdp(_))
        ));
        assert!(validate_answer_matches_offer(&offer, &offer).is_ok());
    }
}
