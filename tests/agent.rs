use std::path::{Path, PathBuf};

use common::{fast_config, server, TestData, USER};
use remotesftp::{Error, TransportCode};

mod common;

const KEY: &[u8] = b"ssh-ed25519 key blob";

#[test]
fn empty_agent_lists_nothing() {
    let test_data = TestData::connected(server(), fast_config());
    let mut agent = test_data.session.agent().expect("Call failed");
    agent.connect(Some(Path::new("/run/agent.sock"))).expect("Call failed");
    let identities = agent.list_identities().expect("Call failed");
    assert_eq!(identities.count(), 0);
}

#[test]
fn identities_come_in_agent_order() {
    let server = server();
    server.add_identity(b"first", "laptop").add_identity(b"second", "");
    let test_data = TestData::connected(server, fast_config());
    let mut agent = test_data.session.agent().expect("Call failed");
    agent.connect(Some(Path::new("/run/agent.sock"))).expect("Call failed");

    let identities: Vec<_> = agent
        .list_identities()
        .expect("Call failed")
        .collect::<Result<_, _>>()
        .expect("Call failed");
    assert_eq!(identities.len(), 2);
    assert_eq!(identities[0].blob(), b"first");
    assert_eq!(identities[0].comment(), "laptop");
    assert_eq!(identities[1].blob(), b"second");
    assert_eq!(identities[1].comment(), "");
}

#[test]
fn broken_slot_does_not_end_listing() {
    let server = server();
    server
        .add_identity(b"first", "a")
        .add_broken_identity(Error::Transport(TransportCode::AgentProtocol))
        .add_identity(b"third", "c");
    let test_data = TestData::connected(server, fast_config());
    let mut agent = test_data.session.agent().expect("Call failed");
    agent.connect(Some(Path::new("/run/agent.sock"))).expect("Call failed");

    let results: Vec<_> = agent.list_identities().expect("Call failed").collect();
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert_eq!(
        results[1].as_ref().err(),
        Some(&Error::Transport(TransportCode::AgentProtocol))
    );
    assert_eq!(results[2].as_ref().map(|identity| identity.blob()), Ok(&b"third"[..]));
}

#[test]
fn authenticates_with_authorized_identity() {
    let server = server();
    server.add_identity(b"other", "").add_identity(KEY, "work");
    server.authorize_key(USER, KEY);
    let test_data = TestData::connected(server, fast_config());
    let mut agent = test_data.session.agent().expect("Call failed");
    agent.connect(Some(Path::new("/run/agent.sock"))).expect("Call failed");

    let mut authenticated = false;
    for identity in agent.list_identities().expect("Call failed") {
        let identity = identity.expect("Call failed");
        if agent.authenticate(USER, &identity).is_ok() {
            authenticated = true;
            break;
        }
    }
    assert!(authenticated);
    assert!(test_data.session.is_authenticated());
}

#[test]
fn unauthorized_identity_is_rejected() {
    let server = server();
    server.add_identity(KEY, "");
    let test_data = TestData::connected(server, fast_config());
    let mut agent = test_data.session.agent().expect("Call failed");
    agent.connect(Some(Path::new("/run/agent.sock"))).expect("Call failed");

    let identity = agent
        .list_identities()
        .expect("Call failed")
        .next()
        .expect("No identity")
        .expect("Call failed");
    assert_eq!(
        agent.authenticate(USER, &identity),
        Err(Error::Transport(TransportCode::PublickeyUnverified))
    );
    assert!(!test_data.session.is_authenticated());
}

#[test]
fn listing_requires_connection() {
    let test_data = TestData::connected(server(), fast_config());
    let agent = test_data.session.agent().expect("Call failed");
    assert_eq!(
        agent.list_identities().err(),
        Some(Error::Transport(TransportCode::BadUse))
    );
}

#[test]
fn connect_falls_back_to_configured_socket() {
    let mut config = fast_config();
    config.agent_socket(PathBuf::from("/run/configured.sock"));
    let test_data = TestData::connected(server(), config);
    let mut agent = test_data.session.agent().expect("Call failed");
    agent.connect(None).expect("Call failed");
    assert_eq!(
        test_data.server.agent_paths(),
        vec![Some(PathBuf::from("/run/configured.sock"))]
    );
}

#[test]
fn unreachable_agent_fails_to_connect() {
    let server = server();
    server.set_agent_available(false);
    let test_data = TestData::connected(server, fast_config());
    let mut agent = test_data.session.agent().expect("Call failed");
    assert_eq!(
        agent.connect(Some(Path::new("/nowhere"))),
        Err(Error::Transport(TransportCode::AgentProtocol))
    );
    assert!(!agent.is_connected());
}

#[test]
fn dropping_agent_frees_it() {
    let test_data = TestData::connected(server(), fast_config());
    {
        let mut agent = test_data.session.agent().expect("Call failed");
        agent.connect(Some(Path::new("/run/agent.sock"))).expect("Call failed");
    }
    assert_eq!(test_data.server.agents_freed(), 1);
}
