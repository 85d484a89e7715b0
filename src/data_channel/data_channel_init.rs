/// DataChannelInit can be used to configure properties of the underlying
/// channel.
#[derive(Debug, Clone)]
pub struct RTCDataChannelInit {
    /// ordered indicates if data is allowed to be delivered out of order.
    /// This profile has no reordering machinery, so an ordered channel only
    /// records the intent on the wire.
    pub ordered: bool,

    /// protocol describes the subprotocol name used for this channel.
    pub protocol: String,

    /// id overrides the default selection of ID for this channel.
    pub id: Option<u16>,
}

impl Default for RTCDataChannelInit {
    fn default() -> Self {
        RTCDataChannelInit {
            ordered: true,
            protocol: String::new(),
            id: None,
        }
    }
}
