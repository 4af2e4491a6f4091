pub fn wrap_twiml(twiml: String) -> String {
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{twiml}")
}

mod twiml {
    use xmlserde::xml_serde_enum;
    use xmlserde_derives::XmlSerialize;

    #[derive(PartialEq, Eq, XmlSerialize)]
    #[xmlserde(root = b"Response")]
    pub struct Response {
        #[xmlserde(ty = "untag")]
        pub actions: Vec<ResponseAction>,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub enum ResponseAction {
        #[xmlserde(name = b"Say")]
        Say(SayAction),
        #[xmlserde(name = b"Dial")]
        Dial(DialAction),
        #[xmlserde(name = b"Hangup")]
        Hangup(HangupAction),
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct SayAction {
        #[xmlserde(ty = "text")]
        pub text: String,
        #[xmlserde(name = b"voice", ty = "attr")]
        pub voice: Option<String>,
        #[xmlserde(name = b"language", ty = "attr")]
        pub language: Option<String>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct DialAction {
        #[xmlserde(name = b"callerId", ty = "attr")]
        pub caller_id: String,
        #[xmlserde(name = b"record", ty = "attr")]
        pub record: Option<DialRecord>,
        #[xmlserde(name = b"recordingStatusCallback", ty = "attr")]
        pub recording_status_callback: Option<String>,
        #[xmlserde(name = b"recordingStatusCallbackMethod", ty = "attr")]
        pub recording_status_callback_method: Option<String>,
        #[xmlserde(name = b"timeLimit", ty = "attr")]
        pub time_limit: Option<u32>,
        #[xmlserde(name = b"Number", ty = "child")]
        pub number: NumberNoun,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct NumberNoun {
        #[xmlserde(ty = "text")]
        pub number: String,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct HangupAction {}

    xml_serde_enum! {
        #[derive(PartialEq, Eq, Debug)]
        DialRecord {
            DoNotRecord => "do-not-record",
            RecordFromAnswer => "record-from-answer",
            RecordFromRinging => "record-from-ringing",
        }
    }
}
pub use twiml::*;

/// Build a `<Say>` followed by `<Hangup/>`, the reply for every origination that is refused.
pub fn say_and_hang_up(message: &str) -> String {
    let response = Response {
        actions: vec![
            ResponseAction::Say(SayAction {
                text: message.to_string(),
                ..Default::default()
            }),
            ResponseAction::Hangup(HangupAction {}),
        ],
    };
    wrap_twiml(xmlserde::xml_serialize(response))
}

/// An empty `<Response/>` acknowledgement for provider callbacks.
pub fn empty_response() -> String {
    wrap_twiml(xmlserde::xml_serialize(Response { actions: vec![] }))
}

mod webhooks {
    use serde::Deserialize;

    /// Sent when a browser client originates a call through the outgoing application.
    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "PascalCase")]
    pub struct VoicePayload {
        pub account_sid: Option<String>,
        pub call_sid: Option<String>,
        pub caller: Option<String>,
        pub to: Option<String>,
        #[serde(rename = "callRecordId")]
        pub call_record_id: Option<String>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "PascalCase")]
    pub struct StatusPayload {
        pub call_sid: Option<String>,
        pub call_status: Option<String>,
        pub call_duration: Option<String>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "PascalCase")]
    pub struct RecordingPayload {
        pub call_sid: Option<String>,
        pub recording_url: Option<String>,
        pub recording_sid: Option<String>,
        pub recording_duration: Option<String>,
        pub recording_status: Option<String>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "PascalCase")]
    pub struct TranscriptionPayload {
        pub call_sid: Option<String>,
        pub recording_sid: Option<String>,
        pub transcription_text: Option<String>,
        pub transcription_status: Option<String>,
    }
}
pub use webhooks::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusal_says_then_hangs_up() {
        let twiml = say_and_hang_up("Calling is not configured.");
        assert!(twiml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>"));
        let say = twiml.find("<Say>Calling is not configured.</Say>").unwrap();
        let hangup = twiml.find("<Hangup").unwrap();
        assert!(say < hangup);
    }

    #[test]
    fn dial_renders_caller_id_recording_and_number() {
        let response = Response {
            actions: vec![ResponseAction::Dial(DialAction {
                caller_id: "+15550001111".to_string(),
                record: Some(DialRecord::RecordFromAnswer),
                recording_status_callback: Some("https://dialer.test/twilio/recording".to_string()),
                number: NumberNoun {
                    number: "+15551234567".to_string(),
                },
                ..Default::default()
            })],
        };
        let twiml = xmlserde::xml_serialize(response);
        assert!(twiml.contains("callerId=\"+15550001111\""));
        assert!(twiml.contains("record=\"record-from-answer\""));
        assert!(twiml.contains("recordingStatusCallback=\"https://dialer.test/twilio/recording\""));
        assert!(twiml.contains("<Number>+15551234567</Number>"));
    }

    #[test]
    fn webhook_fields_use_provider_names() {
        let payload: RecordingPayload = serde_urlencoded::from_str(
            "CallSid=CA1&RecordingUrl=https%3A%2F%2Fapi.example%2FRE1&RecordingSid=RE1\
             &RecordingDuration=42&RecordingStatus=completed&AccountSid=AC1",
        )
        .unwrap();
        assert_eq!(payload.call_sid.as_deref(), Some("CA1"));
        assert_eq!(payload.recording_url.as_deref(), Some("https://api.example/RE1"));
        assert_eq!(payload.recording_duration.as_deref(), Some("42"));

        let voice: VoicePayload =
            serde_urlencoded::from_str("AccountSid=AC1&Caller=client%3Aabc&To=%2B1555&callRecordId=r1")
                .unwrap();
        assert_eq!(voice.caller.as_deref(), Some("client:abc"));
        assert_eq!(voice.to.as_deref(), Some("+1555"));
        assert_eq!(voice.call_record_id.as_deref(), Some("r1"));
        assert!(voice.call_sid.is_none());
    }
}
