use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use proptest::prelude::*;
use runarc::{ArchiveFile, ContainerKind, EntryKind, Error, LocalFileReader, MemoryReader, NativeDecoders};

fn build_tar(members: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap()
}

fn sample() -> Vec<(String, Vec<u8>)> {
    vec![
        ("a.txt".to_string(), b"hello".to_vec()),
        ("dir/b.bin".to_string(), Vec::new()),
        ("c.dat".to_string(), (0..128u8).collect()),
    ]
}

fn open_memory(data: Vec<u8>) -> ArchiveFile {
    ArchiveFile::open(
        Arc::new(MemoryReader::new(data)),
        ContainerKind::Tar,
        &NativeDecoders,
    )
    .unwrap()
}

#[test]
fn three_entry_tar_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&build_tar(&sample())).unwrap();
    file.flush().unwrap();

    let source = Arc::new(LocalFileReader::new(file.path()).unwrap());
    let mut archive =
        ArchiveFile::open_any(source, &ContainerKind::ALL, &NativeDecoders).unwrap();
    assert_eq!(archive.kind(), ContainerKind::Tar);

    let names: Vec<_> = archive.directory().iter().map(|e| e.name()).collect();
    assert_eq!(names, ["a.txt", "dir/b.bin", "c.dat"]);
    assert_eq!(archive.find("a.txt").unwrap().kind(), EntryKind::Script);

    assert!(archive.extract_named("dir/b.bin").unwrap().is_empty());
    assert_eq!(archive.extract_named("c.dat").unwrap(), (0..128u8).collect::<Vec<_>>());
    assert_eq!(archive.extract_named("a.txt").unwrap(), b"hello");
}

#[test]
fn directories_and_long_names() {
    let long = format!("{}/deep.png", "level".repeat(40));
    let mut builder = tar::Builder::new(Vec::new());

    let mut dir = tar::Header::new_gnu();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_size(0);
    dir.set_mode(0o755);
    builder.append_data(&mut dir, "cg/", &b""[..]).unwrap();

    let mut file = tar::Header::new_gnu();
    file.set_size(4);
    file.set_mode(0o644);
    builder.append_data(&mut file, &long, &b"\x89PNG"[..]).unwrap();

    let mut file = tar::Header::new_gnu();
    file.set_size(2);
    file.set_mode(0o644);
    builder.append_data(&mut file, "cg/x.ogg", &b"Og"[..]).unwrap();

    let mut archive = open_memory(builder.into_inner().unwrap());
    assert_eq!(archive.directory().len(), 2);
    assert_eq!(archive.directory().get(0).unwrap().name(), long);
    assert_eq!(archive.directory().get(0).unwrap().kind(), EntryKind::Image);

    assert_eq!(archive.extract_at(1).unwrap(), b"Og");
    assert_eq!(archive.extract_at(0).unwrap(), b"\x89PNG");
}

#[test]
fn not_a_tar() {
    let result = ArchiveFile::open(
        Arc::new(MemoryReader::new(vec![0u8; 2048])),
        ContainerKind::Tar,
        &NativeDecoders,
    );
    assert!(matches!(result, Err(Error::FormatMismatch(ContainerKind::Tar))));
}

#[test]
fn empty_tar_is_a_mismatch() {
    let data = tar::Builder::new(Vec::new()).into_inner().unwrap();
    let result = ArchiveFile::open(
        Arc::new(MemoryReader::new(data)),
        ContainerKind::Tar,
        &NativeDecoders,
    );
    assert!(matches!(result, Err(Error::FormatMismatch(_))));
}

#[test]
fn wrapping_member_size_is_a_mismatch() {
    let mut header = tar::Header::new_gnu();
    header.set_path("huge.bin").unwrap();
    header.set_size(u64::MAX - 511);
    header.set_mode(0o644);
    header.set_cksum();
    let mut data = header.as_bytes().to_vec();
    data.extend_from_slice(&[0u8; 1024]);

    let result = ArchiveFile::open(
        Arc::new(MemoryReader::new(data)),
        ContainerKind::Tar,
        &NativeDecoders,
    );
    assert!(matches!(result, Err(Error::FormatMismatch(ContainerKind::Tar))));
}

#[test]
fn truncated_member_fails_extraction_only() {
    let mut data = build_tar(&[
        ("small".to_string(), b"ok".to_vec()),
        ("big".to_string(), vec![1u8; 4000]),
    ]);
    // cut into the second member's data and drop the end blocks
    data.truncate(512 * 4);

    let mut archive = open_memory(data);
    assert_eq!(archive.directory().len(), 2);
    assert_eq!(archive.extract_at(0).unwrap(), b"ok");
    assert!(matches!(archive.extract_at(1), Err(Error::Extract { .. })));
    assert!(!archive.is_faulted());
}

#[test]
fn local_file_reader_rejects_missing_path() {
    assert!(LocalFileReader::new(Path::new("/nonexistent/archive.tar")).is_err());
}

fn members() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..1500), 1..8).prop_map(|blobs| {
        blobs
            .into_iter()
            .enumerate()
            .map(|(i, data)| (format!("dir{}/file{i}.bin", i % 3), data))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn scan_is_deterministic(members in members()) {
        let data = build_tar(&members);
        let first = open_memory(data.clone());
        let second = open_memory(data);

        prop_assert_eq!(first.directory().len(), members.len());
        let a: Vec<_> = first.directory().iter().map(|e| (e.name().to_string(), e.size())).collect();
        let b: Vec<_> = second.directory().iter().map(|e| (e.name().to_string(), e.size())).collect();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn extraction_order_does_not_matter(
        members in members(),
        order in prop::collection::vec(any::<prop::sample::Index>(), 1..16),
    ) {
        let mut archive = open_memory(build_tar(&members));
        for index in order {
            let i = index.index(members.len());
            prop_assert_eq!(archive.extract_at(i).unwrap(), members[i].1.clone());
        }
    }
}
