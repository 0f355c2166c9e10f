use crate::id::{ChannelId, GuildId, UserId};
use std::fmt;

/// Parameters and information needed to start communicating with a voice relay.
///
/// These are handed out by the main application gateway, which is outside the
/// scope of this crate.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct ConnectionInfo {
    /// ID of the voice channel being joined, if it is known.
    ///
    /// This is not needed to establish a connection, but can be useful
    /// for book-keeping.
    pub channel_id: Option<ChannelId>,
    /// Host (and optional port) of the voice relay assigned to this call.
    pub endpoint: String,
    /// ID of the target voice channel's parent guild.
    pub guild_id: GuildId,
    /// Unique string describing this session for validation/authentication purposes.
    pub session_id: String,
    /// Ephemeral secret used to validate the above session.
    pub token: String,
    /// User ID of this client.
    pub user_id: UserId,
}

impl ConnectionInfo {
    /// Bundles the details received from the main gateway into a form the
    /// driver can connect with.
    pub fn new(
        guild_id: impl Into<GuildId>,
        user_id: impl Into<UserId>,
        session_id: impl Into<String>,
        token: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: None,
            endpoint: endpoint.into(),
            guild_id: guild_id.into(),
            session_id: session_id.into(),
            token: token.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("channel_id", &self.channel_id)
            .field("endpoint", &self.endpoint)
            .field("guild_id", &self.guild_id)
            .field("session_id", &self.session_id)
            .field("token", &"<secret>")
            .field("user_id", &self.user_id)
            .finish()
    }
}
