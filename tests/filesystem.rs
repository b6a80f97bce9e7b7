use std::io::{Read, Seek, SeekFrom, Write};

use common::{get_tmp_path, TestData};
use remotesftp::{
    filesystem::mode, Error, FileType, OpenFlags, OpenOptions, SftpCode, TransportCode,
};
use tracing_test::traced_test;

mod common;

#[test]
fn open_missing_file_reports_no_such_file() {
    let test_data = TestData::setup();
    let sftp = test_data.session.sftp().expect("Call failed");
    let err = sftp
        .open_file(&get_tmp_path(), OpenOptions::new().read(), 0)
        .err()
        .expect("Open should fail");
    assert_eq!(err, Error::Filesystem(SftpCode::NoSuchFile));
    assert!(err.is_not_found());
    assert_eq!(test_data.server.open_handles(), 0);
}

#[test]
fn open_failure_below_sftp_reports_session_error() {
    let test_data = TestData::setup();
    let path = get_tmp_path();
    test_data
        .server
        .fail_open(&path, Some(Error::Transport(TransportCode::SocketRecv)));
    let sftp = test_data.session.sftp().expect("Call failed");
    assert_eq!(
        sftp.open_file(&path, OpenFlags::READ, 0).err(),
        Some(Error::Transport(TransportCode::SocketRecv))
    );
}

#[test]
fn open_failure_without_any_status_is_unknown() {
    let test_data = TestData::setup();
    let path = get_tmp_path();
    test_data.server.fail_open(&path, None);
    let sftp = test_data.session.sftp().expect("Call failed");
    assert_eq!(
        sftp.open_dir(&path, OpenFlags::empty(), 0).err(),
        Some(Error::Unknown(format!("unable to open dir {}, unknown error", path)))
    );
}

#[test]
fn exclusive_create_of_existing_file_fails() {
    let test_data = TestData::setup();
    let path = get_tmp_path();
    test_data.server.put_file(&path, b"", 0o644);
    let sftp = test_data.session.sftp().expect("Call failed");
    assert_eq!(
        sftp.open_file(&path, OpenOptions::new().write().exclusive(), 0o644)
            .err(),
        Some(Error::Filesystem(SftpCode::FileAlreadyExists))
    );
}

#[test]
fn zero_length_read_does_no_io() {
    let test_data = TestData::setup();
    let path = get_tmp_path();
    test_data.server.put_file(&path, b"content", 0o644);
    let sftp = test_data.session.sftp().expect("Call failed");
    let mut file = sftp.open_file(&path, OpenFlags::READ, 0).expect("Call failed");

    assert_eq!(file.read(&mut []), Ok(0));
    assert_eq!(file.tell(), 0);
}

#[test]
fn read_reports_eof_at_end() {
    let test_data = TestData::setup();
    let path = get_tmp_path();
    test_data.server.put_file(&path, b"content", 0o644);
    let sftp = test_data.session.sftp().expect("Call failed");
    let mut file = sftp.open_file(&path, OpenFlags::READ, 0).expect("Call failed");

    let mut buf = [0u8; 64];
    assert_eq!(file.read(&mut buf), Ok(7));
    assert_eq!(&buf[..7], b"content");
    assert_eq!(file.read(&mut buf), Err(Error::Eof));
}

#[test]
fn write_loops_over_partial_writes() {
    let test_data = TestData::setup();
    test_data.server.limit_write_chunk(3);
    let path = get_tmp_path();
    let sftp = test_data.session.sftp().expect("Call failed");
    let mut file = sftp
        .open_file(&path, OpenOptions::new().write().create().truncate(), 0o640)
        .expect("Call failed");

    assert_eq!(file.write(b"hello world"), Ok(11));
    assert_eq!(file.tell(), 11);
    file.close().expect("Call failed");
    assert_eq!(test_data.server.file_contents(&path), Some(b"hello world".to_vec()));
}

#[test]
fn write_failing_after_partial_chunks_reports_error() {
    let test_data = TestData::setup();
    test_data
        .server
        .limit_write_chunk(3)
        .fail_write_after(2, SftpCode::NoSpaceOnFilesystem);
    let path = get_tmp_path();
    let sftp = test_data.session.sftp().expect("Call failed");
    let mut file = sftp
        .open_file(&path, OpenOptions::new().write().create(), 0o640)
        .expect("Call failed");

    assert_eq!(
        file.write(b"hello world"),
        Err(Error::Filesystem(SftpCode::NoSpaceOnFilesystem))
    );
    assert_eq!(test_data.server.file_contents(&path), Some(b"hello ".to_vec()));
}

#[test]
fn create_applies_mode_to_new_file() {
    let test_data = TestData::setup();
    let path = get_tmp_path();
    let sftp = test_data.session.sftp().expect("Call failed");
    sftp.open_file(&path, OpenOptions::new().write().create(), 0o640)
        .expect("Call failed")
        .close()
        .expect("Call failed");

    let metadata = sftp.stat(&path).expect("Call failed");
    assert!(metadata.is_file());
    assert_eq!(metadata.permissions(), Some(0o640));
    assert_eq!(metadata.len(), Some(0));
}

#[test]
fn append_writes_after_existing_content() {
    let test_data = TestData::setup();
    let path = get_tmp_path();
    test_data.server.put_file(&path, b"abc", 0o644);
    let sftp = test_data.session.sftp().expect("Call failed");
    let mut file = sftp
        .open_file(&path, OpenOptions::new().append(), 0)
        .expect("Call failed");
    file.write_all(b"def").expect("Call failed");
    drop(file);
    assert_eq!(test_data.server.file_contents(&path), Some(b"abcdef".to_vec()));
}

#[test]
fn seek_moves_the_cursor() {
    let test_data = TestData::setup();
    let path = get_tmp_path();
    test_data.server.put_file(&path, b"0123456789", 0o644);
    let sftp = test_data.session.sftp().expect("Call failed");
    let mut file = sftp.open_file(&path, OpenFlags::READ, 0).expect("Call failed");

    file.seek(6);
    let mut buf = [0u8; 2];
    assert_eq!(file.read(&mut buf), Ok(2));
    assert_eq!(&buf, b"67");
    assert_eq!(file.tell(), 8);
    file.rewind();
    assert_eq!(file.tell(), 0);
}

#[test]
fn file_works_through_std_io_traits() {
    let test_data = TestData::setup();
    let path = get_tmp_path();
    let sftp = test_data.session.sftp().expect("Call failed");
    let mut file = sftp
        .open_file(&path, OpenOptions::new().read().write().create(), 0o600)
        .expect("Call failed");

    Write::write_all(&mut file, b"line one\nline two\n").expect("Call failed");
    assert_eq!(Seek::seek(&mut file, SeekFrom::End(-9)).expect("Call failed"), 9);
    let mut rest = String::new();
    Read::read_to_string(&mut file, &mut rest).expect("Call failed");
    assert_eq!(rest, "line two\n");

    Seek::seek(&mut file, SeekFrom::Start(0)).expect("Call failed");
    let mut all = Vec::new();
    Read::read_to_end(&mut file, &mut all).expect("Call failed");
    assert_eq!(all, b"line one\nline two\n");
}

#[test]
fn file_stat_reads_handle_attributes() {
    let test_data = TestData::setup();
    let path = get_tmp_path();
    test_data.server.put_file(&path, b"12345", 0o600);
    let sftp = test_data.session.sftp().expect("Call failed");
    let file = sftp.open_file(&path, OpenFlags::READ, 0).expect("Call failed");
    let metadata = file.stat().expect("Call failed");
    assert_eq!(metadata.name(), "");
    assert_eq!(metadata.len(), Some(5));
    assert_eq!(metadata.file_type(), Some(FileType::Regular));
}

#[test]
fn dropping_file_releases_handle() {
    let test_data = TestData::setup();
    let path = get_tmp_path();
    test_data.server.put_file(&path, b"x", 0o644);
    let sftp = test_data.session.sftp().expect("Call failed");
    {
        let _file = sftp.open_file(&path, OpenFlags::READ, 0).expect("Call failed");
        assert_eq!(test_data.server.open_handles(), 1);
    }
    assert_eq!(test_data.server.open_handles(), 0);
}

#[test]
fn mkdir_all_creates_parents() {
    let test_data = TestData::setup();
    let root = get_tmp_path();
    let path = format!("{}/a/b/c", root);
    let sftp = test_data.session.sftp().expect("Call failed");

    sftp.mkdir_all(&path, 0o755).expect("Call failed");
    for dir in [&root, &format!("{}/a", root), &format!("{}/a/b", root), &path] {
        assert!(sftp.stat(dir).expect("Call failed").is_dir());
    }
}

#[test]
fn mkdir_all_is_idempotent() {
    let test_data = TestData::setup();
    let path = format!("{}/nested", get_tmp_path());
    let sftp = test_data.session.sftp().expect("Call failed");
    sftp.mkdir_all(&path, 0o755).expect("Call failed");
    sftp.mkdir_all(&path, 0o755).expect("Call failed");
    sftp.mkdir_all(&format!("{}/", path), 0o755).expect("Call failed");
    sftp.mkdir_all(&format!("{}/.", path), 0o755).expect("Call failed");
}

#[test]
fn mkdir_all_over_file_is_not_a_directory() {
    let test_data = TestData::setup();
    let path = get_tmp_path();
    test_data.server.put_file(&path, b"", 0o644);
    let sftp = test_data.session.sftp().expect("Call failed");

    let err = sftp.mkdir_all(&path, 0o755).expect_err("Should fail");
    assert_eq!(err, Error::Filesystem(SftpCode::NotADirectory));
    let err = sftp
        .mkdir_all(&format!("{}/below", path), 0o755)
        .expect_err("Should fail");
    assert!(err.is_not_a_directory());
    assert!(!test_data.server.exists(&format!("{}/below", path)));
}

#[test]
fn mkdir_existing_reports_status() {
    let test_data = TestData::setup();
    let sftp = test_data.session.sftp().expect("Call failed");
    assert_eq!(
        sftp.mkdir("/tmp", 0o755),
        Err(Error::Filesystem(SftpCode::FileAlreadyExists))
    );
    assert_eq!(
        sftp.last_error(),
        Some(Error::Filesystem(SftpCode::FileAlreadyExists))
    );
}

#[test]
fn read_dir_skips_dot_entries() {
    let test_data = TestData::setup();
    let root = get_tmp_path();
    test_data
        .server
        .put_dir(&root, 0o755)
        .put_file(&format!("{}/b.txt", root), b"bb", 0o644)
        .put_dir(&format!("{}/a", root), 0o700);
    let sftp = test_data.session.sftp().expect("Call failed");

    let entries = sftp.read_dir(&root).expect("Call failed");
    let names: Vec<&str> = entries.iter().map(|entry| entry.name()).collect();
    assert_eq!(names, vec!["a", "b.txt"]);
    assert!(entries[0].is_dir());
    assert_eq!(entries[1].len(), Some(2));
    assert_eq!(test_data.server.open_handles(), 0);
}

#[test]
fn read_dir_of_empty_dir_is_empty() {
    let test_data = TestData::setup();
    let root = get_tmp_path();
    test_data.server.put_dir(&root, 0o755);
    let sftp = test_data.session.sftp().expect("Call failed");
    assert!(sftp.read_dir(&root).expect("Call failed").is_empty());
}

#[test]
fn read_dir_of_file_fails_without_leaking() {
    let test_data = TestData::setup();
    let path = get_tmp_path();
    test_data.server.put_file(&path, b"", 0o644);
    let sftp = test_data.session.sftp().expect("Call failed");
    assert_eq!(
        sftp.read_dir(&path),
        Err(Error::Filesystem(SftpCode::NotADirectory))
    );
    assert_eq!(test_data.server.open_handles(), 0);
}

#[test]
fn read_dir_failing_mid_listing_closes_handle() {
    let test_data = TestData::setup();
    let root = get_tmp_path();
    test_data
        .server
        .put_dir(&root, 0o755)
        .put_file(&format!("{}/a", root), b"", 0o644)
        .put_file(&format!("{}/b", root), b"", 0o644)
        .fail_readdir_after(3, SftpCode::Failure);
    let sftp = test_data.session.sftp().expect("Call failed");

    assert_eq!(sftp.read_dir(&root), Err(Error::Filesystem(SftpCode::Failure)));
    assert_eq!(test_data.server.open_handles(), 0);
}

#[test]
#[traced_test]
fn read_dir_skips_names_longer_than_buffer() {
    let test_data = TestData::setup();
    let root = get_tmp_path();
    let long_name = "n".repeat(600);
    test_data
        .server
        .put_dir(&root, 0o755)
        .put_file(&format!("{}/{}", root, long_name), b"", 0o644)
        .put_file(&format!("{}/short", root), b"", 0o644);
    let sftp = test_data.session.sftp().expect("Call failed");

    let entries = sftp.read_dir(&root).expect("Call failed");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name(), "short");
    assert!(logs_contain("longer than 512 bytes"));
    assert_eq!(test_data.server.open_handles(), 0);
}

#[test]
fn dir_next_entry_streams_listing() {
    let test_data = TestData::setup();
    let root = get_tmp_path();
    test_data
        .server
        .put_dir(&root, 0o755)
        .put_file(&format!("{}/only", root), b"", 0o644);
    let sftp = test_data.session.sftp().expect("Call failed");
    let mut dir = sftp
        .open_dir(&root, OpenFlags::empty(), 0)
        .expect("Call failed");

    let entry = dir.next_entry().expect("Call failed").expect("No entry");
    assert_eq!(entry.name(), "only");
    assert_eq!(dir.next_entry(), Ok(None));
    assert!(dir.stat().expect("Call failed").is_dir());
    dir.close().expect("Call failed");
    assert_eq!(test_data.server.open_handles(), 0);
}

#[test]
fn rename_overwrites_target() {
    let test_data = TestData::setup();
    let old_path = get_tmp_path();
    let new_path = get_tmp_path();
    test_data
        .server
        .put_file(&old_path, b"new", 0o644)
        .put_file(&new_path, b"old", 0o644);
    let sftp = test_data.session.sftp().expect("Call failed");

    sftp.rename(&old_path, &new_path).expect("Call failed");
    assert_eq!(
        sftp.stat(&old_path).err(),
        Some(Error::Filesystem(SftpCode::NoSuchFile))
    );
    assert_eq!(sftp.stat(&new_path).expect("Call failed").len(), Some(3));
    assert_eq!(test_data.server.file_contents(&new_path), Some(b"new".to_vec()));
}

#[test]
fn rename_missing_source_fails() {
    let test_data = TestData::setup();
    let sftp = test_data.session.sftp().expect("Call failed");
    assert_eq!(
        sftp.rename(&get_tmp_path(), &get_tmp_path()),
        Err(Error::Filesystem(SftpCode::NoSuchFile))
    );
}

#[test]
fn rmdir_and_unlink_remove_entries() {
    let test_data = TestData::setup();
    let root = get_tmp_path();
    let file = format!("{}/file", root);
    test_data
        .server
        .put_dir(&root, 0o755)
        .put_file(&file, b"", 0o644);
    let sftp = test_data.session.sftp().expect("Call failed");

    assert_eq!(sftp.rmdir(&root), Err(Error::Filesystem(SftpCode::DirNotEmpty)));
    sftp.unlink(&file).expect("Call failed");
    sftp.rmdir(&root).expect("Call failed");
    assert!(!test_data.server.exists(&root));
    assert_eq!(sftp.unlink(&file), Err(Error::Filesystem(SftpCode::NoSuchFile)));
}

#[test]
fn chmod_leaves_other_attributes() {
    let test_data = TestData::setup();
    let path = get_tmp_path();
    test_data.server.put_file(&path, b"12345", 0o644);
    let sftp = test_data.session.sftp().expect("Call failed");
    let before = sftp.stat(&path).expect("Call failed");

    sftp.chmod(&path, mode::S_IFDIR | 0o600).expect("Call failed");
    let after = sftp.stat(&path).expect("Call failed");
    assert_eq!(after.permissions(), Some(0o600));
    assert!(after.is_file());
    assert_eq!(after.len(), before.len());
    assert_eq!(after.uid(), before.uid());
    assert_eq!(after.modified(), before.modified());
}

#[test]
fn chown_leaves_other_attributes() {
    let test_data = TestData::setup();
    let path = get_tmp_path();
    test_data.server.put_file(&path, b"12345", 0o640);
    let sftp = test_data.session.sftp().expect("Call failed");

    sftp.chown(&path, 0, 42).expect("Call failed");
    let after = sftp.stat(&path).expect("Call failed");
    assert_eq!((after.uid(), after.gid()), (Some(0), Some(42)));
    assert_eq!(after.permissions(), Some(0o640));
    assert_eq!(after.len(), Some(5));
}

#[test]
fn set_times_updates_timestamps() {
    let test_data = TestData::setup();
    let path = get_tmp_path();
    test_data.server.put_file(&path, b"", 0o644);
    let sftp = test_data.session.sftp().expect("Call failed");

    sftp.set_times(&path, 1_000, 2_000).expect("Call failed");
    let attributes = test_data.server.attributes(&path).expect("Missing file");
    assert_eq!(attributes.atime(), Some(1_000));
    assert_eq!(attributes.mtime(), Some(2_000));
}

#[test]
fn lstat_describes_the_link_itself() {
    let test_data = TestData::setup();
    let target = get_tmp_path();
    let link = get_tmp_path();
    test_data
        .server
        .put_dir(&target, 0o755)
        .put_symlink(&link, &target);
    let sftp = test_data.session.sftp().expect("Call failed");

    assert!(sftp.stat(&link).expect("Call failed").is_dir());
    let metadata = sftp.lstat(&link).expect("Call failed");
    assert!(metadata.is_symlink());
    assert_eq!(metadata.name(), link.trim_start_matches("/tmp/"));
}

#[test]
fn shutdown_closes_channel_once() {
    let test_data = TestData::setup();
    let sftp = test_data.session.sftp().expect("Call failed");
    sftp.shutdown().expect("Call failed");
    assert_eq!(test_data.server.sftp_shutdowns(), 1);
}
