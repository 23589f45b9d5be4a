use kovan_txnkv::{FlagsOp, Key, KeyFlags, MemBuffer, StagingHandle};

fn dump(buf: &MemBuffer) -> Vec<(Key, bytes::Bytes)> {
    buf.iter(&Key::default(), None).collect()
}

#[test]
fn test_release_publishes_staged_write() {
    let buf = MemBuffer::default();

    let h = buf.staging();
    buf.set_with_flags("x", "v", &[FlagsOp::SetPresumeKeyNotExists])
        .unwrap();

    let mut seen = Vec::new();
    buf.inspect_stage(h, |k, flags, v| {
        seen.push((k.clone(), flags, v.map(|v| v.to_vec())));
    });
    assert_eq!(
        seen,
        vec![(
            Key::from("x"),
            KeyFlags::PRESUME_KEY_NOT_EXISTS,
            Some(b"v".to_vec())
        )]
    );

    buf.release(h);
    assert_eq!(buf.get(&Key::from("x")).unwrap(), "v");
    assert!(buf.get_flags(&Key::from("x")).unwrap().has_presume_key_not_exists());
    assert_eq!(buf.staging_depth(), 0);
    assert!(buf.dirty());
}

#[test]
fn test_cleanup_discards_staged_write() {
    let buf = MemBuffer::default();
    buf.set("a", "1").unwrap();
    let before = dump(&buf);
    let (len, size) = (buf.len(), buf.size());

    let h = buf.staging();
    buf.set("y", "v2").unwrap();
    buf.set("a", "overwritten").unwrap();
    buf.delete("a").unwrap();
    buf.cleanup(h);

    assert!(buf.get(&Key::from("y")).unwrap_err().is_not_found());
    assert_eq!(dump(&buf), before);
    assert_eq!(buf.len(), len);
    assert_eq!(buf.size(), size);
    assert_eq!(buf.staging_depth(), 0);
}

#[test]
fn test_release_equals_direct_write() {
    let staged = MemBuffer::default();
    let direct = MemBuffer::default();
    for buf in [&staged, &direct] {
        buf.set("a", "1").unwrap();
        buf.set("b", "2").unwrap();
    }

    let h = staged.staging();
    staged.set("b", "22").unwrap();
    staged.delete("a").unwrap();
    staged.set("c", "3").unwrap();
    staged.release(h);

    direct.set("b", "22").unwrap();
    direct.delete("a").unwrap();
    direct.set("c", "3").unwrap();

    assert_eq!(dump(&staged), dump(&direct));
    assert_eq!(staged.len(), direct.len());
    assert_eq!(staged.size(), direct.size());
}

#[test]
fn test_nested_stages_stay_private_until_released() {
    let buf = MemBuffer::default();
    let h1 = buf.staging();
    buf.set("outer", "1").unwrap();
    let h2 = buf.staging();
    buf.set("inner", "2").unwrap();

    let mut inner_keys = Vec::new();
    buf.inspect_stage(h2, |k, _, _| inner_keys.push(k.clone()));
    assert_eq!(inner_keys, vec![Key::from("inner")]);

    let mut outer_keys = Vec::new();
    buf.inspect_stage(h1, |k, _, _| outer_keys.push(k.clone()));
    assert_eq!(outer_keys, vec![Key::from("outer")]);

    buf.release(h2);
    let mut outer_keys = Vec::new();
    buf.inspect_stage(h1, |k, _, _| outer_keys.push(k.clone()));
    assert_eq!(outer_keys, vec![Key::from("inner"), Key::from("outer")]);
    assert!(!buf.dirty(), "base layer untouched until the outer stage is released");

    buf.release(h1);
    assert!(buf.dirty());
    assert_eq!(buf.get(&Key::from("inner")).unwrap(), "2");
    assert_eq!(buf.staging_depth(), 0);
}

#[test]
fn test_cleanup_outer_cascades_to_inner() {
    let buf = MemBuffer::default();
    buf.set("base", "0").unwrap();
    let h1 = buf.staging();
    buf.set("outer", "1").unwrap();
    let _h2 = buf.staging();
    buf.set("inner", "2").unwrap();

    buf.cleanup(h1);
    assert_eq!(buf.staging_depth(), 0);
    assert_eq!(dump(&buf), vec![(Key::from("base"), bytes::Bytes::from("0"))]);
}

#[test]
fn test_release_outer_merges_inner_too() {
    let buf = MemBuffer::default();
    let h1 = buf.staging();
    buf.set("k", "outer").unwrap();
    let _h2 = buf.staging();
    buf.set("k", "inner").unwrap();

    buf.release(h1);
    assert_eq!(buf.staging_depth(), 0);
    assert_eq!(buf.get(&Key::from("k")).unwrap(), "inner");
}

#[test]
fn test_last_active_targets_top_stage() {
    let buf = MemBuffer::default();
    let _h1 = buf.staging();
    buf.set("a", "1").unwrap();
    let _h2 = buf.staging();
    buf.set("b", "2").unwrap();

    buf.cleanup(StagingHandle::LAST_ACTIVE);
    assert_eq!(buf.staging_depth(), 1);
    assert!(buf.get(&Key::from("b")).unwrap_err().is_not_found());
    assert_eq!(buf.get(&Key::from("a")).unwrap(), "1");
}

#[test]
#[should_panic(expected = "stale or already closed")]
fn test_released_handle_is_rejected() {
    let buf = MemBuffer::default();
    let h = buf.staging();
    buf.release(h);
    buf.cleanup(h);
}

#[test]
#[should_panic(expected = "stale or already closed")]
fn test_stale_handle_at_reused_depth_is_rejected() {
    let buf = MemBuffer::default();
    let old = buf.staging();
    buf.cleanup(old);
    let _new = buf.staging();
    // Same depth, different generation
    buf.release(old);
}

#[test]
#[should_panic(expected = "invalid staging handle")]
fn test_invalid_handle_is_rejected() {
    let buf = MemBuffer::default();
    let _h = buf.staging();
    buf.release(StagingHandle::INVALID);
}

#[test]
fn test_lock_flags_survive_cleanup() {
    let buf = MemBuffer::default();
    buf.set("k", "v").unwrap();

    let h = buf.staging();
    buf.set_with_flags("k", "v2", &[FlagsOp::SetKeyLocked, FlagsOp::SetNeedLocked])
        .unwrap();
    buf.update_flags("fresh", &[FlagsOp::SetKeyLocked]);
    buf.cleanup(h);

    let flags = buf.get_flags(&Key::from("k")).unwrap();
    assert!(flags.has_locked(), "remote lock outlives the discarded stage");
    assert!(!flags.has_need_locked(), "local-only bits are discarded");
    assert_eq!(buf.get(&Key::from("k")).unwrap(), "v");
    assert!(buf.get_flags(&Key::from("fresh")).unwrap().has_locked());
    assert!(buf.get(&Key::from("fresh")).unwrap_err().is_not_found());
}

#[test]
fn test_flags_carry_into_new_stage() {
    let buf = MemBuffer::default();
    buf.set_with_flags("k", "v", &[FlagsOp::SetPresumeKeyNotExists])
        .unwrap();

    let h = buf.staging();
    buf.set("k", "v2").unwrap();
    let mut seen = Vec::new();
    buf.inspect_stage(h, |_, flags, _| seen.push(flags));
    assert_eq!(seen, vec![KeyFlags::PRESUME_KEY_NOT_EXISTS]);
    buf.release(h);
}

#[test]
fn test_inspect_stage_reports_tombstones_without_value() {
    let buf = MemBuffer::default();
    buf.set("gone", "1").unwrap();
    let h = buf.staging();
    buf.delete("gone").unwrap();

    let mut seen = Vec::new();
    buf.inspect_stage(h, |k, _, v| seen.push((k.clone(), v.is_none())));
    assert_eq!(seen, vec![(Key::from("gone"), true)]);
    buf.cleanup(h);
    assert_eq!(buf.get(&Key::from("gone")).unwrap(), "1");
}

#[test]
fn test_select_value_history_walks_newest_first() {
    let buf = MemBuffer::default();
    buf.set("k", "v1").unwrap();
    let h1 = buf.staging();
    buf.set("k", "v2").unwrap();
    let h2 = buf.staging();
    buf.delete("k").unwrap();
    let _h3 = buf.staging();
    buf.set("k", "v3").unwrap();

    let newest = buf.select_value_history(&Key::from("k"), |_| true).unwrap();
    assert_eq!(newest, "v3");

    let older = buf
        .select_value_history(&Key::from("k"), |v| v != b"v3")
        .unwrap();
    assert_eq!(older, "v2", "tombstone layer is skipped");

    let base = buf
        .select_value_history(&Key::from("k"), |v| v == b"v1")
        .unwrap();
    assert_eq!(base, "v1");

    let none = buf.select_value_history(&Key::from("k"), |v| v == b"v9");
    assert!(none.unwrap_err().is_not_found());

    let unknown = buf.select_value_history(&Key::from("nope"), |_| true);
    assert!(unknown.unwrap_err().is_not_found());

    buf.cleanup(h2);
    assert_eq!(buf.get(&Key::from("k")).unwrap(), "v2");
    buf.cleanup(h1);
    assert_eq!(buf.get(&Key::from("k")).unwrap(), "v1");
}

#[test]
fn test_snapshot_getter_is_frozen() {
    let buf = MemBuffer::default();
    buf.set("a", "1").unwrap();
    buf.set("b", "2").unwrap();

    let snap = buf.snapshot_getter();
    let mut it = buf.snapshot_iter(&Key::default(), None);
    assert_eq!(it.next().unwrap().0, Key::from("a"));

    let h = buf.staging();
    buf.set("a", "changed").unwrap();
    buf.delete("b").unwrap();
    buf.set("c", "3").unwrap();
    buf.release(h);

    assert_eq!(snap.get(&Key::from("a")).unwrap(), "1");
    assert_eq!(snap.get(&Key::from("b")).unwrap(), "2");
    assert!(snap.get(&Key::from("c")).unwrap_err().is_not_found());

    let rest: Vec<Key> = it.map(|(k, _)| k).collect();
    assert_eq!(rest, vec![Key::from("b")], "in-flight snapshot iterator unaffected");

    let live: Vec<Key> = buf.iter(&Key::default(), None).map(|(k, _)| k).collect();
    assert_eq!(live, vec![Key::from("a"), Key::from("c")]);
}

#[test]
fn test_snapshot_survives_reset() {
    let buf = MemBuffer::default();
    buf.set("a", "1").unwrap();
    let snap = buf.snapshot_getter();
    buf.reset();
    assert_eq!(snap.get(&Key::from("a")).unwrap(), "1");
    assert!(buf.is_empty());
}
