use common::{fast_config, loopback, server, TestData, PASSWORD, USER};
use remotesftp::{
    impl_memory::MemoryEngine, Error, HashType, HostKeyDigest, Session, SessionState, TransportCode,
};

mod common;

#[test]
fn init_allocates_fresh_session() {
    let mut session = Session::<MemoryEngine>::init(fast_config()).expect("Call failed");
    assert_eq!(session.state(), SessionState::Created);
    let (_listener, stream) = loopback();
    session.handshake(stream).expect("Call failed");
    assert_eq!(session.state(), SessionState::HandshakeDone);
}

#[test]
fn handshake_moves_session_forward() {
    let test_data = TestData::connected(server(), fast_config());
    assert_eq!(test_data.session.state(), SessionState::HandshakeDone);
    assert!(!test_data.session.is_authenticated());
}

#[test]
fn second_handshake_is_bad_use() {
    let mut test_data = TestData::connected(server(), fast_config());
    let (_listener, stream) = loopback();
    assert_eq!(
        test_data.session.handshake(stream),
        Err(Error::Transport(TransportCode::BadUse))
    );
}

#[test]
fn calls_before_handshake_are_bad_use() {
    let session = Session::new(server().engine(), fast_config());
    assert_eq!(
        session.authenticate_with_password(USER, PASSWORD),
        Err(Error::Transport(TransportCode::BadUse))
    );
    assert_eq!(
        session.host_key_digest(HashType::Sha256),
        Err(Error::Transport(TransportCode::BadUse))
    );
}

#[test]
fn host_key_digest_has_expected_length() {
    let server = server();
    server.set_host_key(b"some host key blob");
    let test_data = TestData::connected(server, fast_config());

    for hash_type in [HashType::Md5, HashType::Sha1, HashType::Sha256] {
        let digest = test_data
            .session
            .host_key_digest(hash_type)
            .expect("Call failed");
        assert_eq!(digest.as_bytes().len(), hash_type.digest_len());
        assert_eq!(digest, HostKeyDigest::compute(hash_type, b"some host key blob"));
    }
}

#[test]
fn auth_methods_are_split() {
    let server = server();
    server.set_auth_methods("publickey,password,keyboard-interactive");
    let test_data = TestData::connected(server, fast_config());
    assert_eq!(
        test_data
            .session
            .list_auth_methods(USER)
            .expect("Call failed"),
        vec!["publickey", "password", "keyboard-interactive"]
    );
}

#[test]
fn password_auth_succeeds() {
    let test_data = TestData::setup();
    assert!(test_data.session.is_authenticated());
}

#[test]
fn wrong_password_is_rejected() {
    let test_data = TestData::connected(server(), fast_config());
    let err = test_data
        .session
        .authenticate_with_password(USER, "wrong")
        .expect_err("Auth should fail");
    assert_eq!(err, Error::Transport(TransportCode::AuthenticationFailed));
    assert_eq!(test_data.session.last_error(), Some(err));
    assert!(!test_data.session.is_authenticated());
}

#[test]
fn blocked_auth_is_retried() {
    let server = server();
    server.block_auth_rounds(3);
    let test_data = TestData::connected(server, fast_config());
    test_data
        .session
        .authenticate_with_password(USER, PASSWORD)
        .expect("Call failed");
    assert!(test_data.session.is_authenticated());
}

#[test]
fn blocked_auth_surfaces_after_retries() {
    let server = server();
    server.block_auth_rounds(10);
    let mut config = fast_config();
    config.blocked_retries(2);
    let test_data = TestData::connected(server, config);
    assert_eq!(
        test_data.session.authenticate_with_password(USER, PASSWORD),
        Err(Error::Blocked)
    );
}

#[test]
fn sftp_requires_authentication() {
    let test_data = TestData::connected(server(), fast_config());
    assert_eq!(
        test_data.session.sftp().err(),
        Some(Error::Transport(TransportCode::BadUse))
    );
}

#[test]
fn sftp_init_failure_reports_session_error() {
    let test_data = TestData::setup();
    test_data.server.refuse_sftp();
    assert_eq!(
        test_data.session.sftp().err(),
        Some(Error::Transport(TransportCode::ChannelFailure))
    );
}

#[test]
fn sftp_init_failure_without_session_error_keeps_engine_code() {
    let test_data = TestData::setup();
    test_data.server.untrack_errors().refuse_sftp();
    assert_eq!(
        test_data.session.sftp().err(),
        Some(Error::Transport(TransportCode::ChannelFailure))
    );
    assert_eq!(test_data.session.last_error(), None);
}

#[test]
fn disconnect_sends_description() {
    let test_data = TestData::setup();
    test_data
        .session
        .disconnect("bye")
        .expect("Call failed");
    assert_eq!(test_data.server.disconnects(), vec!["bye".to_string()]);
}

#[test]
fn close_releases_context_once() {
    let test_data = TestData::setup();
    let server = test_data.server.clone();
    test_data.session.close().expect("Call failed");
    assert_eq!(server.released_sessions(), 1);
}

#[test]
fn drop_releases_context() {
    let server = {
        let test_data = TestData::setup();
        test_data.server.clone()
    };
    assert_eq!(server.released_sessions(), 1);
}
