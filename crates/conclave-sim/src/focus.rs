//! Conference focus: hosts conversations and relays their traffic.
//!
//! The focus keeps two indexes:
//! - a device directory: participant (bare address) → known devices
//! - per hosted conversation, a roster: participant → joined devices
//!
//! Listing a participant invites every device the directory knows for it.
//! Devices learned later are invited through
//! [`FocusState::notify_device_registration`]. A participant stays in the
//! roster until its last joined device leaves.

use std::collections::{BTreeMap, BTreeSet};

use conclave_core::{
    Address, ChatBody, ConversationId, ConversationParams, ConversationState, EngineError,
    EngineEvent, Message, Stats,
};
use serde::{Deserialize, Serialize};

use crate::action::EngineAction;

/// A conversation hosted by this focus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedConversation {
    subject: String,
    params: ConversationParams,
    /// Participant → joined devices
    roster: BTreeMap<Address, BTreeSet<Address>>,
    /// Devices receiving roster notifications
    subscribers: BTreeSet<Address>,
    version: u64,
}

impl HostedConversation {
    fn new(subject: String, params: ConversationParams) -> Self {
        Self {
            subject,
            params,
            roster: BTreeMap::new(),
            subscribers: BTreeSet::new(),
            version: 0,
        }
    }

    /// Subject line.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Creation options.
    pub fn params(&self) -> ConversationParams {
        self.params
    }

    /// Participants (bare addresses).
    pub fn participants(&self) -> Vec<Address> {
        self.roster.keys().cloned().collect()
    }

    /// Every joined device.
    pub fn devices(&self) -> impl Iterator<Item = &Address> {
        self.roster.values().flatten()
    }

    fn is_joined(&self, device: &Address) -> bool {
        self.roster.get(&device.bare()).is_some_and(|devices| devices.contains(device))
    }

    /// Bump the version and notify every subscriber.
    fn notify_all(&mut self, id: ConversationId) -> Vec<EngineAction> {
        self.version += 1;
        let participants = self.participants();
        let mut actions: Vec<EngineAction> = self
            .subscribers
            .iter()
            .map(|subscriber| {
                EngineAction::send(
                    subscriber,
                    Message::Notify {
                        conversation: id,
                        version: self.version,
                        participants: participants.clone(),
                    },
                )
            })
            .collect();
        actions.push(EngineAction::Emit(EngineEvent::ParticipantsChanged {
            conversation: id,
            participants,
        }));
        actions
    }
}

/// Everything a focus hosts, plus its device directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FocusState {
    directory: BTreeMap<Address, BTreeSet<Address>>,
    hosted: BTreeMap<ConversationId, HostedConversation>,
    #[serde(skip)]
    prune_empty: bool,
}

impl FocusState {
    /// Empty focus.
    pub fn new(prune_empty: bool) -> Self {
        Self { prune_empty, ..Self::default() }
    }

    /// Delete hosted conversations once their last participant leaves.
    pub fn set_prune_empty(&mut self, enabled: bool) {
        self.prune_empty = enabled;
    }

    /// Look up a hosted conversation.
    pub fn conversation(&self, id: ConversationId) -> Option<&HostedConversation> {
        self.hosted.get(&id)
    }

    /// Hosted conversation ids.
    pub fn hosted(&self) -> Vec<ConversationId> {
        self.hosted.keys().copied().collect()
    }

    /// Record a device in the directory. Returns false if already known.
    pub fn register_device(&mut self, device: &Address) -> Result<bool, EngineError> {
        if device.device().is_none() {
            return Err(EngineError::NotADevice(device.clone()));
        }
        Ok(self.directory.entry(device.bare()).or_default().insert(device.clone()))
    }

    /// A device became reachable: record it and invite it into every hosted
    /// conversation listing its participant.
    ///
    /// Returns the actions and the number of conversations it was invited
    /// into.
    pub fn notify_device_registration(
        &mut self,
        stats: &mut Stats,
        device: &Address,
    ) -> Result<(Vec<EngineAction>, usize), EngineError> {
        self.register_device(device)?;

        let participant = device.bare();
        let mut actions = Vec::new();
        let mut invited = 0;
        for (&id, conversation) in &mut self.hosted {
            let Some(devices) = conversation.roster.get_mut(&participant) else {
                continue;
            };
            if !devices.insert(device.clone()) {
                continue;
            }
            invited += 1;
            actions.extend(invite(stats, id, conversation, device));
        }
        if invited > 0 {
            actions.push(EngineAction::Persist);
        }
        Ok((actions, invited))
    }

    /// Host a conversation.
    ///
    /// `creator` is the requesting device, or `None` when the focus creates
    /// the conversation itself.
    pub fn host(
        &mut self,
        stats: &mut Stats,
        id: ConversationId,
        creator: Option<&Address>,
        subject: String,
        participants: &[Address],
        params: ConversationParams,
    ) -> Vec<EngineAction> {
        if self.hosted.contains_key(&id) {
            return creator
                .map(|creator| {
                    EngineAction::send(
                        creator,
                        Message::CreationFailed {
                            conversation: id,
                            reason: "conversation id already in use".to_string(),
                        },
                    )
                })
                .into_iter()
                .collect();
        }

        let mut conversation = HostedConversation::new(subject, params);
        if let Some(creator) = creator {
            conversation.roster.entry(creator.bare()).or_default().insert(creator.clone());
        }

        let mut actions = Vec::new();
        for participant in participants.iter().map(Address::bare) {
            if conversation.roster.contains_key(&participant) {
                continue;
            }
            stats.participants_added += 1;
            actions.extend(self.invite_participant(stats, id, &mut conversation, &participant));
        }

        stats.conversations_hosted += 1;
        tracing::info!(
            conversation = %id,
            participants = conversation.roster.len(),
            "hosting conversation"
        );

        if let Some(creator) = creator {
            actions.insert(
                0,
                EngineAction::send(creator, Message::ConversationCreated { conversation: id }),
            );
        }
        actions.push(EngineAction::Emit(EngineEvent::ConversationState {
            conversation: id,
            state: ConversationState::Created,
        }));
        actions.extend(conversation.notify_all(id));
        actions.push(EngineAction::Persist);

        self.hosted.insert(id, conversation);
        actions
    }

    /// Add a participant to a hosted conversation.
    pub fn add_participant(
        &mut self,
        stats: &mut Stats,
        id: ConversationId,
        participant: &Address,
    ) -> Result<Vec<EngineAction>, EngineError> {
        let mut conversation =
            self.hosted.remove(&id).ok_or(EngineError::UnknownConversation(id))?;

        let participant = participant.bare();
        let mut actions = Vec::new();
        if !conversation.roster.contains_key(&participant) {
            stats.participants_added += 1;
            actions.extend(self.invite_participant(stats, id, &mut conversation, &participant));
            actions.extend(conversation.notify_all(id));
            actions.push(EngineAction::Persist);
        }

        self.hosted.insert(id, conversation);
        Ok(actions)
    }

    /// Relay a message the focus itself sends.
    pub fn broadcast(
        &self,
        id: ConversationId,
        sender: &Address,
        message_id: u64,
        body: &ChatBody,
    ) -> Result<Vec<EngineAction>, EngineError> {
        let conversation = self.hosted.get(&id).ok_or(EngineError::UnknownConversation(id))?;
        Ok(relay(conversation, id, sender, message_id, body))
    }

    /// Terminate a hosted conversation for every participant.
    pub fn terminate(
        &mut self,
        stats: &mut Stats,
        id: ConversationId,
    ) -> Result<Vec<EngineAction>, EngineError> {
        let conversation = self.hosted.remove(&id).ok_or(EngineError::UnknownConversation(id))?;
        stats.conversations_terminated += 1;
        tracing::info!(conversation = %id, "terminating hosted conversation");

        let mut actions: Vec<EngineAction> = conversation
            .devices()
            .map(|device| EngineAction::send(device, Message::Terminated { conversation: id }))
            .collect();
        actions.push(EngineAction::Emit(EngineEvent::ConversationState {
            conversation: id,
            state: ConversationState::Terminated,
        }));
        actions.push(EngineAction::Persist);
        Ok(actions)
    }

    /// Handle a request from a participant device.
    pub fn handle(&mut self, stats: &mut Stats, from: &Address, message: Message) -> Vec<EngineAction> {
        match message {
            Message::CreateConversation { conversation, subject, participants, params } => {
                self.host(stats, conversation, Some(from), subject, &participants, params)
            },
            Message::AddParticipant { conversation, participant } => {
                if !self.hosted.get(&conversation).is_some_and(|c| c.is_joined(from)) {
                    tracing::warn!(%from, %conversation, "add from non-member ignored");
                    return Vec::new();
                }
                self.add_participant(stats, conversation, &participant).unwrap_or_default()
            },
            Message::Leave { conversation } => self.on_leave(stats, from, conversation),
            Message::Subscribe { conversation } => self.on_subscribe(from, conversation),
            Message::Chat { conversation, message_id, body, .. } => {
                self.on_chat(from, conversation, message_id, &body)
            },
            other => {
                tracing::debug!(%from, kind = other.kind(), "focus ignored message");
                Vec::new()
            },
        }
    }

    fn on_leave(&mut self, stats: &mut Stats, from: &Address, id: ConversationId) -> Vec<EngineAction> {
        let mut actions = vec![EngineAction::send(from, Message::LeaveAck { conversation: id })];
        let Some(conversation) = self.hosted.get_mut(&id) else {
            return actions;
        };

        let participant = from.bare();
        conversation.subscribers.remove(from);
        let Some(devices) = conversation.roster.get_mut(&participant) else {
            return actions;
        };
        devices.remove(from);
        if devices.is_empty() {
            conversation.roster.remove(&participant);
            stats.participants_removed += 1;
        }
        tracing::debug!(%from, conversation = %id, remaining = conversation.roster.len(), "device left");

        actions.extend(conversation.notify_all(id));

        if conversation.roster.is_empty() && self.prune_empty {
            self.hosted.remove(&id);
            stats.conversations_terminated += 1;
            tracing::info!(conversation = %id, "pruned empty conversation");
            actions.push(EngineAction::Emit(EngineEvent::ConversationState {
                conversation: id,
                state: ConversationState::Terminated,
            }));
        }
        actions.push(EngineAction::Persist);
        actions
    }

    fn on_subscribe(&mut self, from: &Address, id: ConversationId) -> Vec<EngineAction> {
        let Some(conversation) = self.hosted.get_mut(&id).filter(|c| c.is_joined(from)) else {
            tracing::debug!(%from, conversation = %id, "subscribe to unknown conversation");
            return vec![EngineAction::send(from, Message::Terminated { conversation: id })];
        };

        conversation.subscribers.insert(from.clone());
        vec![
            EngineAction::send(
                from,
                Message::Notify {
                    conversation: id,
                    version: conversation.version,
                    participants: conversation.participants(),
                },
            ),
            EngineAction::Persist,
        ]
    }

    fn on_chat(
        &self,
        from: &Address,
        id: ConversationId,
        message_id: u64,
        body: &ChatBody,
    ) -> Vec<EngineAction> {
        let Some(conversation) = self.hosted.get(&id).filter(|c| c.is_joined(from)) else {
            tracing::warn!(%from, conversation = %id, "chat from non-member dropped");
            return Vec::new();
        };

        let mut actions = relay(conversation, id, from, message_id, body);
        actions.push(EngineAction::send(from, Message::Delivered { conversation: id, message_id }));
        actions
    }

    fn invite_participant(
        &self,
        stats: &mut Stats,
        id: ConversationId,
        conversation: &mut HostedConversation,
        participant: &Address,
    ) -> Vec<EngineAction> {
        let devices = self.directory.get(participant).cloned().unwrap_or_default();
        let mut actions = Vec::new();
        for device in &devices {
            actions.extend(invite(stats, id, conversation, device));
        }
        conversation.roster.insert(participant.clone(), devices);
        actions
    }
}

fn invite(
    stats: &mut Stats,
    id: ConversationId,
    conversation: &HostedConversation,
    device: &Address,
) -> Vec<EngineAction> {
    stats.participant_devices_invited += 1;
    vec![
        EngineAction::send(
            device,
            Message::Invite {
                conversation: id,
                subject: conversation.subject.clone(),
                params: conversation.params,
            },
        ),
        EngineAction::Emit(EngineEvent::DeviceInvited { conversation: id, device: device.clone() }),
    ]
}

/// Forward `body` to every joined device except the sender.
fn relay(
    conversation: &HostedConversation,
    id: ConversationId,
    sender: &Address,
    message_id: u64,
    body: &ChatBody,
) -> Vec<EngineAction> {
    conversation
        .devices()
        .filter(|device| *device != sender)
        .map(|device| {
            EngineAction::send(
                device,
                Message::Chat {
                    conversation: id,
                    message_id,
                    sender: Some(sender.clone()),
                    body: body.clone(),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn sends_to(actions: &[EngineAction], to: &Address) -> Vec<&'static str> {
        actions
            .iter()
            .filter_map(|action| match action {
                EngineAction::Send { to: recipient, message } if recipient == to => {
                    Some(message.kind())
                },
                _ => None,
            })
            .collect()
    }

    #[test]
    fn create_invites_known_devices() {
        let mut focus = FocusState::new(true);
        let mut stats = Stats::default();
        let marie = address("sip:marie@example.org;gr=phone");
        let pauline = address("sip:pauline@example.org;gr=laptop");
        focus.register_device(&pauline).unwrap();

        let id = ConversationId::new(1);
        let actions = focus.handle(
            &mut stats,
            &marie,
            Message::CreateConversation {
                conversation: id,
                subject: "sync".to_string(),
                participants: vec![pauline.bare()],
                params: ConversationParams::new(),
            },
        );

        assert_eq!(sends_to(&actions, &marie), vec!["ConversationCreated"]);
        assert_eq!(sends_to(&actions, &pauline), vec!["Invite"]);
        assert_eq!(
            focus.conversation(id).unwrap().participants(),
            vec![marie.bare(), pauline.bare()]
        );
        assert_eq!(stats.conversations_hosted, 1);
        assert_eq!(stats.participant_devices_invited, 1);
    }

    #[test]
    fn duplicate_id_fails_creation() {
        let mut focus = FocusState::new(true);
        let mut stats = Stats::default();
        let marie = address("sip:marie@example.org;gr=phone");
        let id = ConversationId::new(1);

        focus.host(&mut stats, id, None, "first".to_string(), &[], ConversationParams::new());
        let actions =
            focus.host(&mut stats, id, Some(&marie), "again".to_string(), &[], ConversationParams::new());

        assert_eq!(sends_to(&actions, &marie), vec!["CreationFailed"]);
        assert_eq!(stats.conversations_hosted, 1);
    }

    #[test]
    fn last_leave_empties_roster_and_prunes() {
        let marie = address("sip:marie@example.org;gr=phone");
        let id = ConversationId::new(7);

        for prune in [true, false] {
            let mut focus = FocusState::new(prune);
            let mut stats = Stats::default();
            focus.register_device(&marie).unwrap();
            focus.host(&mut stats, id, None, "s".to_string(), &[marie.bare()], ConversationParams::new());

            let actions = focus.handle(&mut stats, &marie, Message::Leave { conversation: id });

            assert_eq!(sends_to(&actions, &marie), vec!["LeaveAck"]);
            assert_eq!(stats.participants_removed, 1);
            if prune {
                assert!(focus.conversation(id).is_none());
            } else {
                assert!(focus.conversation(id).unwrap().participants().is_empty());
            }
        }
    }

    #[test]
    fn late_device_is_invited_into_listing_conversations() {
        let mut focus = FocusState::new(true);
        let mut stats = Stats::default();
        let laure = address("sip:laure@example.org;gr=tablet");
        let id = ConversationId::new(3);
        focus.host(&mut stats, id, None, "s".to_string(), &[laure.bare()], ConversationParams::new());

        let (actions, invited) = focus.notify_device_registration(&mut stats, &laure).unwrap();
        assert_eq!(invited, 1);
        assert_eq!(sends_to(&actions, &laure), vec!["Invite"]);

        let (_, again) = focus.notify_device_registration(&mut stats, &laure).unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn bare_address_is_not_a_device() {
        let mut focus = FocusState::new(true);
        let bare = address("sip:laure@example.org");
        assert!(matches!(focus.register_device(&bare), Err(EngineError::NotADevice(_))));
    }

    #[test]
    fn chat_is_relayed_to_other_members_only() {
        let mut focus = FocusState::new(true);
        let mut stats = Stats::default();
        let marie = address("sip:marie@example.org;gr=phone");
        let pauline = address("sip:pauline@example.org;gr=laptop");
        let stranger = address("sip:eve@example.org;gr=pc");
        focus.register_device(&marie).unwrap();
        focus.register_device(&pauline).unwrap();
        let id = ConversationId::new(9);
        focus.host(
            &mut stats,
            id,
            None,
            "s".to_string(),
            &[marie.bare(), pauline.bare()],
            ConversationParams::new(),
        );

        let chat = Message::Chat {
            conversation: id,
            message_id: 1,
            sender: None,
            body: ChatBody::Plain("hi".to_string()),
        };
        let actions = focus.handle(&mut stats, &marie, chat.clone());
        assert_eq!(sends_to(&actions, &pauline), vec!["Chat"]);
        assert_eq!(sends_to(&actions, &marie), vec!["Delivered"]);

        assert!(focus.handle(&mut stats, &stranger, chat).is_empty());
    }

    #[test]
    fn subscribe_to_unknown_conversation_is_terminated() {
        let mut focus = FocusState::new(true);
        let marie = address("sip:marie@example.org;gr=phone");

        let actions = focus.handle(
            &mut Stats::default(),
            &marie,
            Message::Subscribe { conversation: ConversationId::new(4) },
        );
        assert_eq!(sends_to(&actions, &marie), vec!["Terminated"]);
    }
}
