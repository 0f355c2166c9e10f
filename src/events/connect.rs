use crate::{
    id::{ChannelId, GuildId},
    ConnectionInfo,
};

/// Session details gathered when a voice session is (re)established.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct ConnectData {
    /// Host name of the voice relay, with any default port removed.
    pub server: String,
    /// The [RTP SSRC] *("Synchronisation source")* assigned by the relay for
    /// the duration of this session.
    ///
    /// [RTP SSRC]: https://tools.ietf.org/html/rfc3550#section-3
    pub ssrc: u32,
    /// Unique string describing this session.
    pub session_id: String,
    /// ID of the target voice channel's parent guild.
    pub guild_id: GuildId,
    /// ID of the voice channel, if it was supplied when connecting.
    pub channel_id: Option<ChannelId>,
}

impl ConnectData {
    pub(crate) fn new(info: &ConnectionInfo, ssrc: u32) -> Self {
        Self {
            server: info.endpoint.clone(),
            ssrc,
            session_id: info.session_id.clone(),
            guild_id: info.guild_id,
            channel_id: info.channel_id,
        }
    }
}
