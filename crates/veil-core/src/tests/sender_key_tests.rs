use super::{conversation, full_address, test_env};
use crate::error::CoreError;
use crate::key_metadata::{build_key_id, Device};
use crate::sender_key::KEY_METADATA_COLLECTION;
use crate::store::DurableStore;
use crate::time::DAY_MS;

#[tokio::test]
async fn distribution_id_is_stable_and_persisted() {
    let env = test_env().await;
    let thread = conversation("team");

    let first = env
        .core
        .distribution_id_for_sending(&thread)
        .await
        .expect("first id");
    let second = env
        .core
        .distribution_id_for_sending(&thread)
        .await
        .expect("second id");
    assert_eq!(first, second);

    let other = conversation("other");
    let unrelated = env
        .core
        .distribution_id_for_sending(&other)
        .await
        .expect("other id");
    assert_ne!(first, unrelated);

    // A rebuilt core reads the same lineage back from the store.
    let rebuilt = super::test_env_with_store(env.store.clone(), env.local.clone()).await;
    let restored = rebuilt
        .core
        .distribution_id_for_sending(&thread)
        .await
        .expect("restored id");
    assert_eq!(first, restored);
}

#[tokio::test]
async fn all_candidates_need_key_before_any_metadata() {
    let env = test_env().await;
    let thread = conversation("team");
    let candidates = vec![full_address("+15550100030"), full_address("+15550100031")];

    let needing = env
        .core
        .recipients_needing_key(&thread, &candidates, 1_000)
        .await
        .expect("needing");
    assert_eq!(needing, candidates);
}

#[tokio::test]
async fn recorded_recipient_with_unchanged_devices_is_skipped() {
    let env = test_env().await;
    let thread = conversation("team");
    let member = full_address("+15550100032");
    env.directory
        .set_devices(&member, vec![Device::new(1, Some(100))])
        .await;

    env.core
        .record_sender_key(&thread, vec![1, 2, 3], 1_000)
        .await
        .expect("record key");
    let needing = env
        .core
        .recipients_needing_key(&thread, &[member.clone()], 1_000)
        .await
        .expect("needing");
    assert_eq!(needing, vec![member.clone()]);

    env.core
        .record_sent(&thread, &member, 2_000)
        .await
        .expect("record sent");
    let needing = env
        .core
        .recipients_needing_key(&thread, &[member.clone()], 2_000)
        .await
        .expect("needing");
    assert!(needing.is_empty());

    // A new device shows up and the member needs the key again.
    env.directory
        .add_device(&member, Device::new(2, Some(200)))
        .await;
    let needing = env
        .core
        .recipients_needing_key(&thread, &[member.clone()], 3_000)
        .await
        .expect("needing");
    assert_eq!(needing, vec![member]);
}

#[tokio::test]
async fn missing_registration_id_always_forces_resend() {
    let env = test_env().await;
    let thread = conversation("team");
    let member = full_address("+15550100033");
    env.directory
        .set_devices(&member, vec![Device::new(1, None)])
        .await;

    env.core
        .record_sender_key(&thread, vec![1], 1_000)
        .await
        .expect("record key");
    env.core
        .record_sent(&thread, &member, 1_500)
        .await
        .expect("record sent");

    let needing = env
        .core
        .recipients_needing_key(&thread, &[member.clone()], 2_000)
        .await
        .expect("needing");
    assert_eq!(needing, vec![member]);
}

#[tokio::test]
async fn expired_key_forces_full_redistribution() {
    let env = test_env().await;
    let thread = conversation("team");
    let members = vec![full_address("+15550100034"), full_address("+15550100035")];
    for member in &members {
        env.directory
            .set_devices(member, vec![Device::new(1, Some(100))])
            .await;
    }

    let created_at = 1_000;
    env.core
        .record_sender_key(&thread, vec![1], created_at)
        .await
        .expect("record key");
    for member in &members {
        env.core
            .record_sent(&thread, member, created_at)
            .await
            .expect("record sent");
    }

    let before_expiry = created_at + 29 * DAY_MS;
    let needing = env
        .core
        .recipients_needing_key(&thread, &members, before_expiry)
        .await
        .expect("needing");
    assert!(needing.is_empty());

    let after_expiry = created_at + 31 * DAY_MS;
    let needing = env
        .core
        .recipients_needing_key(&thread, &members, after_expiry)
        .await
        .expect("needing");
    assert_eq!(needing, members);

    // The expired metadata was dropped, not kept around.
    assert!(!env
        .core
        .sender_keys()
        .is_key_valid(&thread, after_expiry)
        .await
        .expect("validity"));
}

#[tokio::test]
async fn record_sent_without_metadata_is_a_caller_error() {
    let env = test_env().await;
    let thread = conversation("team");
    let member = full_address("+15550100036");

    let result = env.core.record_sent(&thread, &member, 1_000).await;
    assert!(matches!(result, Err(CoreError::MissingKeyMetadata)));

    // A distribution id alone is not enough.
    env.core
        .distribution_id_for_sending(&thread)
        .await
        .expect("id");
    let result = env.core.record_sent(&thread, &member, 1_000).await;
    assert!(matches!(result, Err(CoreError::MissingKeyMetadata)));
}

#[tokio::test]
async fn reset_delivery_record_targets_one_recipient() {
    let env = test_env().await;
    let thread = conversation("team");
    let kept = full_address("+15550100037");
    let reset = full_address("+15550100038");
    for member in [&kept, &reset] {
        env.directory
            .set_devices(member, vec![Device::new(1, Some(100))])
            .await;
    }

    env.core
        .record_sender_key(&thread, vec![1], 1_000)
        .await
        .expect("record key");
    for member in [&kept, &reset] {
        env.core
            .record_sent(&thread, member, 1_000)
            .await
            .expect("record sent");
    }

    env.core
        .reset_delivery_record(&thread, &reset)
        .await
        .expect("reset");
    let needing = env
        .core
        .recipients_needing_key(&thread, &[kept, reset.clone()], 2_000)
        .await
        .expect("needing");
    assert_eq!(needing, vec![reset]);
}

#[tokio::test]
async fn reset_all_drops_metadata_but_keeps_lineage() {
    let env = test_env().await;
    let thread = conversation("team");
    let member = full_address("+15550100039");
    env.directory
        .set_devices(&member, vec![Device::new(1, Some(100))])
        .await;

    let lineage = env
        .core
        .record_sender_key(&thread, vec![1], 1_000)
        .await
        .expect("record key");
    env.core
        .record_sent(&thread, &member, 1_000)
        .await
        .expect("record sent");

    env.core.reset_all(&thread).await.expect("reset all");
    let needing = env
        .core
        .recipients_needing_key(&thread, &[member.clone()], 2_000)
        .await
        .expect("needing");
    assert_eq!(needing, vec![member]);

    let after = env
        .core
        .distribution_id_for_sending(&thread)
        .await
        .expect("id");
    assert_eq!(lineage, after);
}

#[tokio::test]
async fn corrupt_metadata_is_treated_as_absent() {
    let env = test_env().await;
    let thread = conversation("team");
    let member = full_address("+15550100040");

    env.directory
        .set_devices(&member, vec![Device::new(1, Some(100))])
        .await;

    let distribution_id = env
        .core
        .record_sender_key(&thread, vec![1], 1_000)
        .await
        .expect("record key");
    env.core
        .record_sent(&thread, &member, 1_000)
        .await
        .expect("record sent");
    let owner = env.local.stable_id.expect("local stable id");
    let key_id = build_key_id(&owner, &distribution_id);
    env.store
        .put(KEY_METADATA_COLLECTION, &key_id, b"not json")
        .await
        .expect("corrupt");

    // The warm cache still hides the corruption.
    let needing = env
        .core
        .recipients_needing_key(&thread, &[member.clone()], 2_000)
        .await
        .expect("needing");
    assert!(needing.is_empty());

    // A fresh core reads the corrupt bytes and fails open toward
    // redistributing rather than skipping the recipient.
    let fresh = super::test_env_with_store(env.store.clone(), env.local.clone()).await;
    let needing = fresh
        .core
        .recipients_needing_key(&thread, &[member.clone()], 2_000)
        .await
        .expect("needing");
    assert_eq!(needing, vec![member]);
}

#[tokio::test]
async fn clear_wipes_every_lineage() {
    let env = test_env().await;
    let thread = conversation("team");
    let member = full_address("+15550100041");
    env.directory
        .set_devices(&member, vec![Device::new(1, Some(100))])
        .await;

    let before = env
        .core
        .record_sender_key(&thread, vec![1], 1_000)
        .await
        .expect("record key");
    env.core
        .record_sent(&thread, &member, 1_000)
        .await
        .expect("record sent");

    env.core.sender_keys().clear().await.expect("clear");
    let needing = env
        .core
        .recipients_needing_key(&thread, &[member.clone()], 2_000)
        .await
        .expect("needing");
    assert_eq!(needing, vec![member]);
    let after = env
        .core
        .distribution_id_for_sending(&thread)
        .await
        .expect("id");
    assert_ne!(before, after);
}

#[tokio::test]
async fn received_keys_never_expire() {
    let env = test_env().await;
    let owner = uuid::Uuid::new_v4();
    let distribution_id = uuid::Uuid::new_v4();

    env.core
        .sender_keys()
        .record_received_key(owner, 3, distribution_id, vec![1, 2], 1_000)
        .await
        .expect("received key");

    let key_id = build_key_id(&owner, &distribution_id);
    let bytes = env
        .store
        .get(KEY_METADATA_COLLECTION, &key_id)
        .await
        .expect("get")
        .expect("stored");
    let metadata = crate::key_metadata::decode_key_metadata(&bytes).expect("decode");
    assert!(!metadata.is_for_encrypting);
    assert!(metadata.is_valid(1_000 + 365 * DAY_MS, 30 * DAY_MS));
}
