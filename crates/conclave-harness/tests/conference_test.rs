//! Conferencing scenarios driven through the harness roles.

mod support;

use std::time::Duration;

use conclave_core::{
    ConversationId, ConversationParams, ConversationState, Engine, EngineEvent, ProfileStore,
};
use conclave_harness::{Harness, poll_endpoints};
use conclave_sim::{NetworkConfig, SimFactory, SimNetwork};
use support::{FOCUS, harness};

#[test]
fn focus_message_reaches_invitee() {
    let harness = harness(11);
    let focus = harness.focus(FOCUS).unwrap();
    let marie = harness.client("marie", &focus, false).unwrap();
    assert!(focus.register_participant_device(marie.identity()));

    let conversation = focus
        .engine_mut()
        .create_conversation("hello", &[marie.identity().bare()], ConversationParams::new())
        .unwrap();
    assert!(poll_endpoints(&[&focus, &marie]).wait(|| {
        marie.engine().is_registered() && marie.stats().notifies_received == 1
    }));

    focus.engine_mut().send_message(conversation, "bonjour").unwrap();
    assert!(poll_endpoints(&[&focus, &marie]).wait(|| marie.stats().messages_received == 1));

    let history = marie.engine().history(conversation);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].body, "bonjour");
    assert_eq!(&history[0].from, focus.identity());
    insta::assert_snapshot!(
        marie.stats(),
        @"registrations_ok=1 conversations_joined=1 participants_added=1 subscriptions_sent=1 notifies_received=1 messages_received=1"
    );
    harness.context().assert_passed();
}

#[test]
fn client_created_conversation_delivers_both_ways() {
    let harness = harness(12);
    let focus = harness.focus(FOCUS).unwrap();
    let marie = harness.client("marie", &focus, false).unwrap();
    let pauline = harness.client("pauline", &focus, false).unwrap();
    focus.register_participant_device(marie.identity());
    focus.register_participant_device(pauline.identity());

    let conversation = marie
        .engine_mut()
        .create_conversation("lunch", &[pauline.identity().bare()], ConversationParams::new())
        .unwrap();
    assert_eq!(marie.engine().conversation_state(conversation), Some(ConversationState::CreationPending));

    assert!(poll_endpoints(&[&focus, &marie, &pauline]).wait(|| {
        marie.stats().participants_added == 2 && pauline.stats().participants_added == 2
    }));
    assert_eq!(marie.engine().conversation_state(conversation), Some(ConversationState::Created));
    assert_eq!(focus.roster(conversation).len(), 2);

    let before_marie = marie.stats();
    let before_pauline = pauline.stats();
    marie.engine_mut().send_message(conversation, "on y va ?").unwrap();
    pauline.engine_mut().send_message(conversation, "oui").unwrap();

    assert!(poll_endpoints(&[&focus, &marie, &pauline]).wait(|| {
        let marie = marie.stats().delta_since(&before_marie);
        let pauline = pauline.stats().delta_since(&before_pauline);
        marie.messages_received == 1
            && marie.messages_delivered == 1
            && pauline.messages_received == 1
            && pauline.messages_delivered == 1
    }));
    assert_eq!(marie.stats().conversations_created, 1);
    assert_eq!(pauline.stats().conversations_joined, 1);
    assert_eq!(focus.stats().conversations_hosted, 1);
    harness.context().assert_passed();
}

#[test]
fn sealed_messages_need_encryption_on_both_ends() {
    let harness = harness(13);
    let focus = harness.focus(FOCUS).unwrap();
    let marie = harness.client("marie", &focus, true).unwrap();
    let pauline = harness.client("pauline", &focus, true).unwrap();
    let laure = harness.client("laure", &focus, false).unwrap();
    for client in [&marie, &pauline, &laure] {
        focus.register_participant_device(client.identity());
    }

    let conversation = marie
        .engine_mut()
        .create_conversation(
            "secret",
            &[pauline.identity().bare(), laure.identity().bare()],
            ConversationParams::new().encrypted(),
        )
        .unwrap();
    assert!(poll_endpoints(&[&focus, &marie, &pauline, &laure]).wait(|| {
        [&marie, &pauline, &laure].iter().all(|c| c.stats().participants_added == 3)
    }));

    marie.engine_mut().send_message(conversation, "entre nous").unwrap();
    assert!(poll_endpoints(&[&focus, &marie, &pauline, &laure]).wait(|| {
        pauline.stats().encrypted_messages_received == 1 && laure.stats().decryption_failures == 1
    }));

    assert_eq!(pauline.engine().history(conversation)[0].body, "entre nous");
    assert!(laure.engine().history(conversation).is_empty());
    assert_eq!(laure.stats().messages_received, 0);

    // Laure cannot start an encrypted conversation of her own.
    let refused =
        laure.engine_mut().create_conversation("nope", &[], ConversationParams::new().encrypted());
    assert!(refused.is_err());
    harness.context().assert_passed();
}

#[test]
fn ephemeral_messages_expire_on_both_sides() {
    let harness = harness(14);
    let focus = harness.focus(FOCUS).unwrap();
    let marie = harness.client("marie", &focus, false).unwrap();
    let pauline = harness.client("pauline", &focus, false).unwrap();
    focus.register_participant_device(marie.identity());
    focus.register_participant_device(pauline.identity());

    let lifetime = Duration::from_millis(50);
    let conversation = marie
        .engine_mut()
        .create_conversation(
            "fleeting",
            &[pauline.identity().bare()],
            ConversationParams::new().ephemeral(lifetime),
        )
        .unwrap();
    assert!(poll_endpoints(&[&focus, &marie, &pauline]).wait(|| {
        pauline.engine().conversation_state(conversation) == Some(ConversationState::Created)
            && marie.engine().conversation_state(conversation) == Some(ConversationState::Created)
    }));

    marie.engine_mut().send_message(conversation, "gone soon").unwrap();
    assert!(poll_endpoints(&[&focus, &marie, &pauline]).wait(|| pauline.stats().messages_received == 1));

    poll_endpoints(&[&focus, &marie, &pauline]).idle(lifetime * 3);

    assert!(marie.engine().history(conversation).is_empty());
    assert!(pauline.engine().history(conversation).is_empty());
    assert_eq!(marie.stats().ephemeral_messages_expired, 1);
    assert_eq!(pauline.stats().ephemeral_messages_expired, 1);
}

#[test]
fn late_device_registration_invites_into_existing_conversations() {
    let harness = harness(15);
    let focus = harness.focus(FOCUS).unwrap();
    let laure = harness.client("laure", &focus, false).unwrap();

    let first = focus
        .engine_mut()
        .create_conversation("one", &[laure.identity().bare()], ConversationParams::new())
        .unwrap();
    let second = focus
        .engine_mut()
        .create_conversation("two", &[laure.identity().bare()], ConversationParams::new())
        .unwrap();
    assert_eq!(focus.stats().participant_devices_invited, 0);

    assert_eq!(focus.notify_device_registration(laure.identity()), 2);
    assert_eq!(focus.notify_device_registration(laure.identity()), 0, "already invited");

    assert!(poll_endpoints(&[&focus, &laure]).wait(|| laure.stats().conversations_joined == 2));
    let mut open = laure.engine().open_conversations();
    open.sort();
    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(open, expected);
    harness.context().assert_passed();
}

#[test]
fn client_restart_resubscribes_and_keeps_receiving() {
    let harness = harness(16);
    let focus = harness.focus(FOCUS).unwrap();
    let mut marie = harness.client("marie", &focus, false).unwrap();
    focus.register_participant_device(marie.identity());

    let conversation = focus
        .engine_mut()
        .create_conversation("durable", &[marie.identity().bare()], ConversationParams::new())
        .unwrap();
    assert!(poll_endpoints(&[&focus, &marie]).wait(|| marie.stats().notifies_received == 1));

    marie.restart(true).unwrap();
    assert_eq!(marie.engine().conversation_state(conversation), Some(ConversationState::Created));
    assert!(poll_endpoints(&[&focus, &marie]).wait(|| marie.stats().notifies_received == 2));
    assert_eq!(marie.stats().subscriptions_sent, 2);

    focus.engine_mut().send_message(conversation, "still there?").unwrap();
    assert!(poll_endpoints(&[&focus, &marie]).wait(|| marie.stats().messages_received == 1));
    assert_eq!(marie.stats().restarts, 1);
    harness.context().assert_passed();
}

#[test]
fn focus_restart_keeps_hosting_and_recording() {
    let harness = harness(17);
    let mut focus = harness.focus(FOCUS).unwrap();
    let marie = harness.client("marie", &focus, false).unwrap();
    focus.register_participant_device(marie.identity());

    let conversation = focus
        .engine_mut()
        .create_conversation("survivor", &[marie.identity().bare()], ConversationParams::new())
        .unwrap();
    assert!(poll_endpoints(&[&focus, &marie]).wait(|| marie.stats().notifies_received == 1));

    focus.restart(true).unwrap();

    let registered = focus.events().iter().filter(|e| **e == EngineEvent::Registered).count();
    assert_eq!(registered, 2);
    assert_eq!(focus.roster(conversation), vec![marie.identity().bare()]);

    focus.engine_mut().send_message(conversation, "back").unwrap();
    assert!(poll_endpoints(&[&focus, &marie]).wait(|| marie.stats().messages_received == 1));
    harness.context().assert_passed();
}

#[test]
fn focus_leaving_terminates_for_everyone() {
    let harness = harness(18);
    let focus = harness.focus(FOCUS).unwrap();
    let marie = harness.client("marie", &focus, false).unwrap();
    let pauline = harness.client("pauline", &focus, false).unwrap();
    focus.register_participant_device(marie.identity());
    focus.register_participant_device(pauline.identity());

    let conversation = focus
        .engine_mut()
        .create_conversation(
            "short",
            &[marie.identity().bare(), pauline.identity().bare()],
            ConversationParams::new(),
        )
        .unwrap();
    assert!(poll_endpoints(&[&focus, &marie, &pauline]).wait(|| {
        marie.stats().conversations_joined == 1 && pauline.stats().conversations_joined == 1
    }));

    focus.engine_mut().leave_conversation(conversation).unwrap();
    assert!(poll_endpoints(&[&focus, &marie, &pauline]).wait(|| {
        marie.engine().open_conversations().is_empty()
            && pauline.engine().open_conversations().is_empty()
    }));

    assert_eq!(marie.stats().conversations_terminated, 1);
    assert_eq!(pauline.stats().conversations_terminated, 1);
    assert!(focus.events().contains(&EngineEvent::ConversationState {
        conversation,
        state: ConversationState::Terminated,
    }));
}

#[test]
fn role_failures_are_recorded_in_context() {
    let harness = harness(19);
    let focus = harness.focus(FOCUS).unwrap();

    assert!(!focus.register_participant_device(&support::focus_address()));
    assert!(focus.roster(ConversationId::new(7)).is_empty());

    let report = harness.finish().unwrap_err();
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures[0].message.starts_with("register participant device sip:focus@example.org"));
    assert_eq!(report.failures[1].message, "focus does not host 0000000000000007");
    assert!(report.failures.iter().all(|f| f.location.file().ends_with("conference_test.rs")));
}

#[test]
fn profiles_load_from_toml_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("focus.toml"),
        "[identity]\nuser = \"focus\"\ndomain = \"example.org\"\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("marie.toml"),
        concat!(
            "[identity]\n",
            "user = \"marie\"\n",
            "domain = \"example.org\"\n",
            "device = \"phone\"\n",
            "\n",
            "[registration]\n",
            "expires_secs = 600\n",
        ),
    )
    .unwrap();
    std::fs::write(dir.path().join("broken.toml"), "[identity]\nuser = \"x\"\n").unwrap();

    let network = SimNetwork::new(NetworkConfig::with_seed(20));
    let harness = Harness::new(SimFactory::new(network, ProfileStore::from_dir(dir.path())));

    let focus = harness.focus("focus").unwrap();
    let marie = harness.client("marie", &focus, false).unwrap();
    assert_eq!(marie.identity().to_string(), "sip:marie@example.org;gr=phone");
    assert!(poll_endpoints(&[&focus, &marie]).wait(|| {
        focus.engine().is_registered() && marie.engine().is_registered()
    }));

    assert!(harness.endpoint("broken").is_none());
    let report = harness.finish().unwrap_err();
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].message.starts_with("create endpoint broken"));
}
