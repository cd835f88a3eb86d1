//! Per-endpoint protocol counters.
//!
//! Engines increment these as side effects of processing protocol events.
//! Counters only ever grow between explicit resets, so waiting code compares
//! against a snapshot taken when its waiting window opened:
//!
//! ```ignore
//! let before = client.stats();
//! // ... act ...
//! poller.wait(|| client.stats().delta_since(&before).messages_received >= 1);
//! ```

use std::fmt;

use serde::Serialize;

macro_rules! stats_block {
    ($( $(#[$doc:meta])* $field:ident ),* $(,)?) => {
        /// Counter block owned by one endpoint.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
        pub struct Stats {
            $( $(#[$doc])* pub $field: u64, )*
        }

        impl Stats {
            /// Field-wise `self - before`, saturating at zero.
            ///
            /// Saturation only matters if the counters were reset inside the
            /// window; monotonic counters never underflow.
            #[must_use]
            pub fn delta_since(&self, before: &Self) -> Self {
                Self { $( $field: self.$field.saturating_sub(before.$field), )* }
            }

            /// Add `earlier` into `self`, field-wise and saturating.
            ///
            /// Carries a retired block into a fresh one that may already have
            /// counted something.
            pub fn accumulate(&mut self, earlier: &Self) {
                $( self.$field = self.$field.saturating_add(earlier.$field); )*
            }

            /// `(name, value)` pairs in declaration order.
            pub fn counters(&self) -> Vec<(&'static str, u64)> {
                vec![$( (stringify!($field), self.$field), )*]
            }
        }
    };
}

stats_block! {
    /// REGISTER answered with success
    registrations_ok,
    /// REGISTER refused or timed out
    registration_failures,
    /// Bindings removed on shutdown
    unregistrations,
    /// Conversations that reached `Created` on this endpoint
    conversations_created,
    /// Conversations this focus started hosting
    conversations_hosted,
    /// Conversations joined through an invitation
    conversations_joined,
    /// Create requests refused by the focus
    conversation_creation_failures,
    /// Conversations left after the focus acknowledged
    conversations_left,
    /// Conversations closed by the focus or pruned
    conversations_terminated,
    /// Participants that appeared in a roster
    participants_added,
    /// Participants that disappeared from a roster
    participants_removed,
    /// Devices a focus invited into a conversation
    participant_devices_invited,
    /// Conference event subscriptions sent
    subscriptions_sent,
    /// Conference event notifications received
    notifies_received,
    /// Chat messages sent
    messages_sent,
    /// Chat messages acknowledged by the focus
    messages_delivered,
    /// Chat messages received from other participants
    messages_received,
    /// Received messages that were sealed end to end
    encrypted_messages_received,
    /// Sealed messages that could not be opened
    decryption_failures,
    /// Ephemeral messages removed from history
    ephemeral_messages_expired,
    /// Engine instances replaced by a restart
    restarts,
}

impl Stats {
    /// Zero every counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Lists non-zero counters, space separated.
impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.counters() {
            if value == 0 {
                continue;
            }
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        if first {
            f.write_str("(all zero)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn display_lists_non_zero_counters() {
        let stats = Stats { registrations_ok: 1, messages_received: 3, ..Stats::default() };
        insta::assert_snapshot!(stats, @"registrations_ok=1 messages_received=3");
        insta::assert_snapshot!(Stats::default(), @"(all zero)");
    }

    #[test]
    fn reset_zeroes_everything() {
        let mut stats = Stats { messages_sent: 9, restarts: 2, ..Stats::default() };
        stats.reset();
        assert_eq!(stats, Stats::default());
    }

    #[test]
    fn accumulate_keeps_both_blocks() {
        let retired = Stats { registrations_ok: 2, subscriptions_sent: 1, ..Stats::default() };
        let mut fresh = Stats { registrations_ok: 1, subscriptions_sent: 1, ..Stats::default() };
        fresh.accumulate(&retired);

        assert_eq!(fresh.registrations_ok, 3);
        assert_eq!(fresh.subscriptions_sent, 2);
        assert_eq!(fresh.delta_since(&retired), Stats { registrations_ok: 1, subscriptions_sent: 1, ..Stats::default() });

        let mut full = Stats { messages_sent: u64::MAX, ..Stats::default() };
        full.accumulate(&Stats { messages_sent: 1, ..Stats::default() });
        assert_eq!(full.messages_sent, u64::MAX);
    }

    proptest! {
        #[test]
        fn delta_of_grown_counters_is_growth(base in 0u64..1_000, growth in 0u64..1_000) {
            let before = Stats { messages_received: base, ..Stats::default() };
            let after = Stats { messages_received: base + growth, ..Stats::default() };

            prop_assert_eq!(after.delta_since(&before).messages_received, growth);
            prop_assert_eq!(after.delta_since(&after), Stats::default());
        }
    }
}
