use std::collections::HashSet;
use std::ffi::OsStr;
use std::sync::Arc;
use std::thread;

use memfs::config::Config;
use memfs::meta::table::ROOT_INO;
use memfs::{FsError, MemFs};

fn fs_with(capacity: usize, max_fd: u64, block_size: u64) -> MemFs {
    let cfg = Config {
        capacity,
        max_fd,
        block_size,
        ..Config::default()
    };
    MemFs::with_owner(&cfg, 1000, 1000)
}

fn name(s: &str) -> &OsStr {
    OsStr::new(s)
}

#[test]
fn create_write_read_unlink() {
    let fs = fs_with(10, 64, 4096);
    let (entry, fd) = fs.create(ROOT_INO, name("a.txt"), 0o644, 0, 0).unwrap();
    let ino = entry.attr.ino;

    assert_eq!(fs.write(ino, fd, 0, b"0123456789").unwrap(), 10);
    assert_eq!(fs.read(ino, fd, 0, 10).unwrap(), b"0123456789");
    assert_eq!(fs.lookup(ROOT_INO, name("a.txt")).unwrap().attr.size, 10);
    fs.release(fd).unwrap();

    fs.unlink(ROOT_INO, name("a.txt")).unwrap();
    assert_eq!(
        fs.lookup(ROOT_INO, name("a.txt")).err(),
        Some(FsError::NotFound)
    );
    assert_eq!(fs.getattr(ino).err(), Some(FsError::NotFound));
}

#[test]
fn descriptor_pool_exhaustion_and_reuse() {
    let max_fd = 16;
    let fs = fs_with(2, max_fd, 64);
    let (entry, first) = fs.create(ROOT_INO, name("f"), 0o644, 0, 0).unwrap();
    let ino = entry.attr.ino;

    let mut held = vec![first];
    for _ in 1..max_fd {
        held.push(fs.open(ino).unwrap());
    }
    let unique: HashSet<_> = held.iter().copied().collect();
    assert_eq!(unique.len(), max_fd as usize);
    assert!(held.iter().all(|&fd| fd < max_fd));

    assert_eq!(fs.open(ino), Err(FsError::TooManyOpen));
    // create also needs a descriptor, and must not leave the slot taken
    assert_eq!(
        fs.create(ROOT_INO, name("g"), 0o644, 0, 0).err(),
        Some(FsError::TooManyOpen)
    );
    assert_eq!(fs.lookup(ROOT_INO, name("g")).err(), Some(FsError::NotFound));

    let freed = held[5];
    fs.release(freed).unwrap();
    assert_eq!(fs.open(ino), Ok(freed));
}

#[test]
fn capacity_then_unlink_frees_a_slot() {
    let fs = fs_with(10, 64, 64);
    let mut fds = Vec::new();
    for i in 0..10 {
        let (_, fd) = fs
            .create(ROOT_INO, name(&format!("f{i}")), 0o644, 0, 0)
            .unwrap();
        fds.push(fd);
    }
    assert_eq!(
        fs.create(ROOT_INO, name("extra"), 0o644, 0, 0).err(),
        Some(FsError::NoSpace)
    );

    fs.unlink(ROOT_INO, name("f3")).unwrap();
    let (entry, _) = fs.create(ROOT_INO, name("extra"), 0o644, 0, 0).unwrap();
    // slot 3 is the one that was freed
    assert_eq!(entry.attr.ino, 5);
    assert_eq!(entry.generation, 2);
}

#[test]
fn inode_is_stable_until_unlink() {
    let fs = fs_with(4, 64, 64);
    let (a, _) = fs.create(ROOT_INO, name("a"), 0o644, 0, 0).unwrap();
    let (b, _) = fs.create(ROOT_INO, name("b"), 0o644, 0, 0).unwrap();
    for _ in 0..3 {
        assert_eq!(fs.table().find_by_inode(a.attr.ino).unwrap().name(), "a");
        assert_eq!(fs.lookup(ROOT_INO, name("b")).unwrap().attr.ino, b.attr.ino);
    }
    fs.unlink(ROOT_INO, name("a")).unwrap();
    assert!(fs.table().find_by_inode(a.attr.ino).is_none());
    assert_eq!(fs.lookup(ROOT_INO, name("b")).unwrap().attr.ino, b.attr.ino);
}

#[test]
fn readdir_lists_dots_then_files_and_paginates() {
    let fs = fs_with(4, 64, 64);
    for n in ["one", "two", "three"] {
        fs.create(ROOT_INO, name(n), 0o644, 0, 0).unwrap();
    }
    let all = fs.readdir(ROOT_INO, 0, 100).unwrap();
    let names: Vec<_> = all.iter().map(|e| e.name.to_string_lossy().to_string()).collect();
    assert_eq!(names, vec![".", "..", "one", "two", "three"]);
    assert_eq!(all[0].ino, ROOT_INO);
    assert_eq!(all[1].ino, ROOT_INO);
    assert_eq!(all[2].ino, 2);

    let page = fs.readdir(ROOT_INO, 1, 2).unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].name, "..");
    assert_eq!(page[1].name, "one");

    assert_eq!(fs.readdir(ROOT_INO, 4, 10).unwrap().len(), 1);
    assert!(fs.readdir(ROOT_INO, 5, 10).unwrap().is_empty());
    assert!(fs.readdir(ROOT_INO, 1000, 10).unwrap().is_empty());
}

#[test]
fn unwritten_ranges_read_as_zero() {
    let fs = fs_with(2, 8, 64);
    let (entry, fd) = fs.create(ROOT_INO, name("sparse"), 0o644, 0, 0).unwrap();
    let ino = entry.attr.ino;
    assert_eq!(fs.read(ino, fd, 0, 16).unwrap(), vec![0u8; 16]);

    fs.write(ino, fd, 200, b"tail").unwrap();
    assert_eq!(fs.read(ino, fd, 0, 16).unwrap(), vec![0u8; 16]);
    assert_eq!(fs.read(ino, fd, 196, 8).unwrap(), b"\0\0\0\0tail");
    assert_eq!(fs.getattr(ino).unwrap().size, 204);
}

#[test]
fn reads_and_writes_cross_block_boundaries() {
    let fs = fs_with(2, 8, 16);
    let (entry, fd) = fs.create(ROOT_INO, name("big"), 0o644, 0, 0).unwrap();
    let ino = entry.attr.ino;
    let data: Vec<u8> = (0..100u8).collect();
    assert_eq!(fs.write(ino, fd, 7, &data).unwrap(), 100);
    assert_eq!(fs.read(ino, fd, 7, 100).unwrap(), data);
    assert_eq!(fs.table().find_by_inode(ino).unwrap().block_count(), 7);
}

#[test]
fn size_tracks_largest_write_end() {
    let fs = fs_with(2, 8, 32);
    let (entry, fd) = fs.create(ROOT_INO, name("s"), 0o644, 0, 0).unwrap();
    let ino = entry.attr.ino;
    let writes = [(10u64, 5usize), (0, 3), (90, 10), (50, 1)];
    let mut expected = 0;
    for (off, len) in writes {
        fs.write(ino, fd, off, &vec![1u8; len]).unwrap();
        expected = expected.max(off + len as u64);
        assert_eq!(fs.getattr(ino).unwrap().size, expected);
    }
}

#[test]
fn two_handles_share_one_file() {
    let fs = fs_with(2, 8, 64);
    let (entry, w) = fs.create(ROOT_INO, name("shared"), 0o644, 0, 0).unwrap();
    let ino = entry.attr.ino;
    let r = fs.open(ino).unwrap();
    fs.write(ino, w, 0, b"hello").unwrap();
    assert_eq!(fs.read(ino, r, 0, 5).unwrap(), b"hello");
    fs.release(w).unwrap();
    assert_eq!(fs.read(ino, r, 0, 5).unwrap(), b"hello");
    assert_eq!(fs.read(ino, w, 0, 5), Err(FsError::BadDescriptor));
}

#[test]
fn concurrent_readers_see_consistent_block() {
    let fs = Arc::new(fs_with(2, 64, 4096));
    let (entry, fd) = fs.create(ROOT_INO, name("hot"), 0o644, 0, 0).unwrap();
    let ino = entry.attr.ino;
    let pattern: Vec<u8> = (0..4096).map(|i| (i * 7 % 256) as u8).collect();
    fs.write(ino, fd, 0, &pattern).unwrap();

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let fs = Arc::clone(&fs);
            let pattern = pattern.clone();
            thread::spawn(move || {
                let my_fd = fs.open(ino).unwrap();
                for _ in 0..50 {
                    assert_eq!(fs.read(ino, my_fd, 0, 4096).unwrap(), pattern);
                }
                fs.release(my_fd).unwrap();
            })
        })
        .collect();
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(fs.handles().len(), 1);
}

#[test]
fn concurrent_creates_get_distinct_slots_and_descriptors() {
    let fs = Arc::new(fs_with(8, 64, 64));
    let results: Vec<_> = (0..8)
        .map(|i| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                fs.create(ROOT_INO, OsStr::new(&format!("c{i}")), 0o644, 0, 0)
                    .map(|(e, fd)| (e.attr.ino, fd))
            })
        })
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    let inos: HashSet<_> = results.iter().map(|r| r.0).collect();
    let fds: HashSet<_> = results.iter().map(|r| r.1).collect();
    assert_eq!(inos.len(), 8);
    assert_eq!(fds.len(), 8);
    assert!(inos.iter().all(|&i| (2..10).contains(&i)));
}
