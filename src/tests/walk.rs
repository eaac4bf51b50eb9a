use crate::tests::util::{self, pair, Dir};
use crate::{Kind, Options, Walk};

#[test]
fn flat_directory() {
    let dir = Dir::tmp();
    dir.mkdirp("D");
    dir.touch_all(&["D/a", "D/b", "D/c"]);

    let mut walk =
        Walk::open(&[dir.join("D")], Options::PHYSICAL, None).unwrap();
    let events = util::collect(&mut walk);

    assert_eq!(events.len(), 5);
    assert_eq!((events[0].kind, events[0].level), (Kind::PreDir, 0));
    assert_eq!(events[0].name, "D");
    assert_eq!((events[4].kind, events[4].level), (Kind::PostDir, 0));
    assert_eq!(events[4].name, "D");

    // readdir order is unspecified, so the middle is checked as a set.
    let mut middle: Vec<(Kind, String)> = util::pairs(&events[1..4]);
    middle.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(
        middle,
        vec![
            pair(Kind::File, "a"),
            pair(Kind::File, "b"),
            pair(Kind::File, "c"),
        ]
    );
    assert!(events[1..4].iter().all(|e| e.level == 1));
}

#[test]
fn sorted_nested() {
    let dir = Dir::tmp();
    dir.mkdirp("D/sub");
    dir.touch_all(&["D/m", "D/sub/z", "D/sub/a"]);

    let mut walk = Walk::open(
        &[dir.join("D")],
        Options::PHYSICAL,
        Some(util::by_name()),
    )
    .unwrap();
    let events = util::collect(&mut walk);

    assert_eq!(
        util::pairs(&events),
        vec![
            pair(Kind::PreDir, "D"),
            pair(Kind::File, "m"),
            pair(Kind::PreDir, "sub"),
            pair(Kind::File, "a"),
            pair(Kind::File, "z"),
            pair(Kind::PostDir, "sub"),
            pair(Kind::PostDir, "D"),
        ]
    );

    // Full paths reconstruct from the root argument down.
    assert_eq!(events[0].path, dir.join("D"));
    assert_eq!(events[1].path, dir.join("D/m"));
    assert_eq!(events[2].path, dir.join("D/sub"));
    assert_eq!(events[3].path, dir.join("D/sub/a"));
    assert_eq!(events[5].path, dir.join("D/sub"));
    assert_eq!(events[6].path, dir.join("D"));
}

#[test]
fn symlink_loop() {
    skip_if_no_symlinks!();
    let dir = Dir::tmp();
    dir.mkdirp("D");
    dir.symlink("D", "D/loop");

    let mut walk =
        Walk::open(&[dir.join("D")], Options::LOGICAL, None).unwrap();
    let mut seen = Vec::new();
    loop {
        let (kind, name, cycle_path) = match walk.read().unwrap() {
            None => break,
            Some(ent) => (
                ent.kind(),
                ent.file_name().to_os_string(),
                ent.cycle().map(|anc| anc.path()),
            ),
        };
        if kind == Kind::Cycle {
            let ancestor = cycle_path.expect("cycle entries link an ancestor");
            assert!(
                same_file::is_same_file(&ancestor, dir.join("D")).unwrap()
            );
        } else {
            assert!(cycle_path.is_none());
        }
        seen.push((kind, name.to_string_lossy().into_owned()));
    }
    assert_eq!(
        seen,
        vec![
            pair(Kind::PreDir, "D"),
            pair(Kind::Cycle, "loop"),
            pair(Kind::PostDir, "D"),
        ]
    );
}

#[test]
fn unreadable_directory() {
    skip_if_root!();
    let dir = Dir::tmp();
    dir.mkdirp("D/priv");
    dir.chmod("D/priv", 0o000);

    let mut walk =
        Walk::open(&[dir.join("D")], Options::PHYSICAL, None).unwrap();
    let events = util::collect(&mut walk);
    dir.chmod("D/priv", 0o755);

    assert_eq!(
        util::pairs(&events),
        vec![
            pair(Kind::PreDir, "D"),
            pair(Kind::UnreadableDir, "priv"),
            pair(Kind::PostDir, "D"),
        ]
    );
    assert_eq!(events[1].errno, Some(libc::EACCES));
}

#[test]
fn missing_second_root() {
    let dir = Dir::tmp();
    dir.mkdirp("alpha");

    let roots = [dir.join("alpha"), dir.join("missing")];
    let mut walk = Walk::open(&roots, Options::PHYSICAL, None).unwrap();
    let events = util::collect(&mut walk);

    assert_eq!(
        util::pairs(&events),
        vec![
            pair(Kind::PreDir, "alpha"),
            pair(Kind::PostDir, "alpha"),
            pair(Kind::StatFailed, "missing"),
        ]
    );
    assert_eq!(events[2].errno, Some(libc::ENOENT));
    assert_eq!(events[2].path, dir.join("missing"));
}

#[test]
fn empty_root_rejected() {
    let err = Walk::open(&[""], Options::PHYSICAL, None).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
}

#[test]
fn empty_directory() {
    let dir = Dir::tmp();
    dir.mkdirp("E");

    let mut walk =
        Walk::open(&[dir.join("E")], Options::PHYSICAL, None).unwrap();
    let events = util::collect(&mut walk);
    assert_eq!(
        util::pairs(&events),
        vec![pair(Kind::PreDir, "E"), pair(Kind::PostDir, "E")]
    );
}

#[test]
fn depth_first_pairing_and_levels() {
    let dir = Dir::tmp();
    dir.mkdirp("T/a/deep/deeper");
    dir.mkdirp("T/b");
    dir.touch_all(&["T/f", "T/a/g", "T/a/deep/h", "T/a/deep/deeper/i"]);

    let mut walk = Walk::open(
        &[dir.join("T")],
        Options::PHYSICAL,
        Some(util::by_name()),
    )
    .unwrap();
    let events = util::collect(&mut walk);

    // Every pre visit pairs with a post visit of the same directory, with
    // every descendant strictly in between, and levels track the open
    // directory stack.
    let mut stack: Vec<String> = Vec::new();
    for event in &events {
        let name = event.name.to_string_lossy().into_owned();
        match event.kind {
            Kind::PreDir => {
                assert_eq!(event.level as usize, stack.len());
                stack.push(name);
            }
            Kind::PostDir => {
                assert_eq!(stack.pop(), Some(name));
                assert_eq!(event.level as usize, stack.len());
            }
            _ => {
                assert_eq!(event.level as usize, stack.len());
            }
        }
    }
    assert!(stack.is_empty());
    assert_eq!(events.len(), 2 * 5 + 4);
}

#[test]
fn see_dot() {
    let dir = Dir::tmp();
    dir.mkdirp("D/sub");
    dir.touch("D/f");

    let opts = Options::PHYSICAL | Options::SEE_DOT;
    let mut walk =
        Walk::open(&[dir.join("D")], opts, Some(util::by_name())).unwrap();
    let events = util::collect(&mut walk);

    assert_eq!(
        util::pairs(&events),
        vec![
            pair(Kind::PreDir, "D"),
            pair(Kind::Dot, "."),
            pair(Kind::Dot, ".."),
            pair(Kind::File, "f"),
            pair(Kind::PreDir, "sub"),
            pair(Kind::Dot, "."),
            pair(Kind::Dot, ".."),
            pair(Kind::PostDir, "sub"),
            pair(Kind::PostDir, "D"),
        ]
    );
}

#[test]
fn nostat_elides_metadata() {
    let dir = Dir::tmp();
    dir.mkdirp("D/sub");
    dir.touch_all(&["D/x", "D/y"]);

    let opts = Options::PHYSICAL | Options::NO_STAT;
    let mut walk =
        Walk::open(&[dir.join("D")], opts, Some(util::by_name())).unwrap();
    let events = util::collect(&mut walk);

    assert_eq!(
        util::pairs(&events),
        vec![
            pair(Kind::PreDir, "D"),
            pair(Kind::PreDir, "sub"),
            pair(Kind::PostDir, "sub"),
            pair(Kind::NoStat, "x"),
            pair(Kind::NoStat, "y"),
            pair(Kind::PostDir, "D"),
        ]
    );
    for event in &events {
        assert!(!event.has_metadata, "NO_STAT keeps metadata slots empty");
    }
}

#[test]
fn full_paths_mode_matches_handle_mode() {
    let dir = Dir::tmp();
    dir.mkdirp("D/sub/inner");
    dir.touch_all(&["D/m", "D/sub/z", "D/sub/inner/q"]);

    let run = |opts: Options| {
        let mut walk =
            Walk::open(&[dir.join("D")], opts, Some(util::by_name()))
                .unwrap();
        util::collect(&mut walk)
            .into_iter()
            .map(|e| (e.kind, e.path, e.level))
            .collect::<Vec<_>>()
    };

    let with_handles = run(Options::PHYSICAL);
    let with_full_paths = run(Options::PHYSICAL | Options::FULL_PATHS);
    assert_eq!(with_handles, with_full_paths);
}

#[test]
fn sorted_roots() {
    let dir = Dir::tmp();
    dir.mkdirp("beta");
    dir.mkdirp("alpha");

    let roots = [dir.join("beta"), dir.join("alpha")];
    let mut walk =
        Walk::open(&roots, Options::PHYSICAL, Some(util::by_name()))
            .unwrap();
    let events = util::collect(&mut walk);
    assert_eq!(
        util::pairs(&events),
        vec![
            pair(Kind::PreDir, "alpha"),
            pair(Kind::PostDir, "alpha"),
            pair(Kind::PreDir, "beta"),
            pair(Kind::PostDir, "beta"),
        ]
    );
}

#[test]
fn broken_symlink_logical() {
    skip_if_no_symlinks!();
    let dir = Dir::tmp();
    dir.mkdirp("D");
    dir.symlink("no-such-target", "D/dangle");

    let mut walk =
        Walk::open(&[dir.join("D")], Options::LOGICAL, None).unwrap();
    let events = util::collect(&mut walk);

    assert_eq!(
        util::pairs(&events),
        vec![
            pair(Kind::PreDir, "D"),
            pair(Kind::BrokenSymlink, "dangle"),
            pair(Kind::PostDir, "D"),
        ]
    );
    // A broken link is not an error: errno stays clear and the lstat
    // metadata of the link itself is available.
    assert_eq!(events[1].errno, None);
    assert!(events[1].has_metadata);
}

#[test]
fn physical_walk_treats_symlinks_as_leaves() {
    skip_if_no_symlinks!();
    let dir = Dir::tmp();
    dir.mkdirp("D/sub");
    dir.touch("D/sub/file");
    dir.symlink("D/sub", "D/link");

    let mut walk = Walk::open(
        &[dir.join("D")],
        Options::PHYSICAL,
        Some(util::by_name()),
    )
    .unwrap();
    let events = util::collect(&mut walk);

    assert_eq!(
        util::pairs(&events),
        vec![
            pair(Kind::PreDir, "D"),
            pair(Kind::Symlink, "link"),
            pair(Kind::PreDir, "sub"),
            pair(Kind::File, "file"),
            pair(Kind::PostDir, "sub"),
            pair(Kind::PostDir, "D"),
        ]
    );
}

#[test]
fn same_file_system_options_roundtrip() {
    let opts = Options::PHYSICAL
        | Options::NO_STAT
        | Options::SAME_FILE_SYSTEM
        | Options::WHITEOUT;
    assert_eq!(Options::from_bits(opts.bits()), Some(opts));
    assert!(opts.contains(Options::SAME_FILE_SYSTEM));
    assert!(!opts.contains(Options::LOGICAL));
    // Bits outside the defined mask are rejected.
    assert_eq!(Options::from_bits(1 << 30), None);
}
