#![allow(dead_code)]

use std::net::{TcpListener, TcpStream};

use remotesftp::{
    impl_memory::{MemoryEngine, MemoryServer},
    impl_russh::RusshEngine,
    Session, SessionConfig,
};
use testcontainers::{core::ContainerPort, runners::SyncRunner, Container, GenericImage};
use uuid::Uuid;

pub const USER: &str = "tester";
pub const PASSWORD: &str = "hunter2";

pub fn get_tmp_path() -> String {
    format!("/tmp/{}", Uuid::new_v4())
}

/// A connected loopback socket. The listener must outlive the stream.
pub fn loopback() -> (TcpListener, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Could not bind loopback listener");
    let addr = listener.local_addr().expect("Could not get listener address");
    let stream = TcpStream::connect(addr).expect("Could not connect to loopback listener");
    (listener, stream)
}

pub fn server() -> MemoryServer {
    let server = MemoryServer::new();
    server.add_user(USER, PASSWORD).put_dir("/tmp", 0o777);
    server
}

pub struct TestData {
    pub server: MemoryServer,
    pub session: Session<MemoryEngine>,
    _listener: TcpListener,
}

impl TestData {
    /// Handshake done, not authenticated yet.
    pub fn connected(server: MemoryServer, config: SessionConfig) -> TestData {
        let (listener, stream) = loopback();
        let mut session = Session::new(server.engine(), config);
        session.handshake(stream).expect("Could not handshake");
        TestData {
            server,
            session,
            _listener: listener,
        }
    }

    pub fn setup() -> TestData {
        let data = TestData::connected(server(), fast_config());
        data.session
            .authenticate_with_password(USER, PASSWORD)
            .expect("Could not auth");
        data
    }
}

/// Default configuration without the would-block backoff.
pub fn fast_config() -> SessionConfig {
    let mut config = SessionConfig::new();
    config.blocked_backoff(std::time::Duration::ZERO);
    config
}

/// A real SSH server in a container, reached through the russh engine.
pub struct ContainerData {
    pub session: Session<RusshEngine>,
    _container: Container<GenericImage>,
}

impl ContainerData {
    pub fn setup() -> ContainerData {
        let container = GenericImage::new("ssh_server", "latest")
            .with_exposed_port(ContainerPort::Tcp(22))
            .start()
            .expect("Could not start SSH container");
        let ssh_port = container
            .get_host_port_ipv4(ContainerPort::Tcp(22))
            .expect("Could not get SSH container port corresponding to 22");
        std::thread::sleep(std::time::Duration::from_millis(100));

        let stream = TcpStream::connect(("localhost", ssh_port)).expect("Could not connect");
        let engine = RusshEngine::new(Default::default()).expect("Could not create engine");
        let mut session = Session::new(engine, SessionConfig::new());
        session.handshake(stream).expect("Could not handshake");
        session
            .authenticate_with_password("root", "root123")
            .expect("Could not auth");

        ContainerData {
            session,
            _container: container,
        }
    }
}
