//! Gateway intents bitflags, sent on IDENTIFY to scope which events are
//! delivered.

use bitflags::bitflags;

bitflags! {
    /// Gateway intents.
    ///
    /// Bit values match Discord's documented intent flags.
    pub struct Intents: u64 {
        /// Guild create/update/delete/role/channel/thread events.
        const GUILDS = 1 << 0;
        /// Guild member add/update/remove.
        const GUILD_MEMBERS = 1 << 1;
        /// Guild ban add/remove.
        const GUILD_MODERATION = 1 << 2;
        /// Guild emoji and sticker updates.
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        /// Guild integration updates.
        const GUILD_INTEGRATIONS = 1 << 4;
        /// Guild webhook updates.
        const GUILD_WEBHOOKS = 1 << 5;
        /// Guild invite create/delete.
        const GUILD_INVITES = 1 << 6;
        /// Guild voice state updates.
        const GUILD_VOICE_STATES = 1 << 7;
        /// Guild presence updates.
        const GUILD_PRESENCES = 1 << 8;
        /// Guild message create/update/delete.
        const GUILD_MESSAGES = 1 << 9;
        /// Guild message reaction add/remove.
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        /// Guild typing start.
        const GUILD_MESSAGE_TYPING = 1 << 11;
        /// Direct message create/update/delete.
        const DIRECT_MESSAGES = 1 << 12;
        /// Direct message reaction add/remove.
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        /// Direct message typing start.
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        /// Message content is included on payloads that would otherwise omit it.
        const MESSAGE_CONTENT = 1 << 15;
        /// Guild scheduled event create/update/delete/user add/remove.
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
        /// Auto moderation rule create/update/delete.
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        /// Auto moderation action execution.
        const AUTO_MODERATION_EXECUTION = 1 << 21;
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::Intents;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Intents: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);

    #[test]
    fn bits_match_documented_values() {
        assert_eq!(1, Intents::GUILDS.bits());
        assert_eq!(1 << 15, Intents::MESSAGE_CONTENT.bits());
        assert_eq!(1 << 21, Intents::AUTO_MODERATION_EXECUTION.bits());
    }

    #[test]
    fn default_is_empty() {
        assert!(Intents::default().is_empty());
    }
}
