//! End-to-end scenarios over real FIFOs: a background server, thin
//! clients, and the full setup/request/response/quit lifecycle.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use ems::{BackgroundServer, Client, ClientError, Server, ServerConfig};

fn start_server(dir: &TempDir) -> (BackgroundServer, PathBuf) {
    start_server_with(dir, |config| config)
}

fn start_server_with(
    dir: &TempDir,
    configure: impl FnOnce(ServerConfig) -> ServerConfig,
) -> (BackgroundServer, PathBuf) {
    let pipe = dir.path().join("server.pipe");
    let config = configure(ServerConfig::new(&pipe));
    let server = Server::new(config).unwrap().spawn().unwrap();
    (server, pipe)
}

fn connect(dir: &TempDir, pipe: &Path, tag: &str) -> Client {
    Client::connect(
        pipe,
        &dir.path().join(format!("{tag}.req")),
        &dir.path().join(format!("{tag}.resp")),
    )
    .unwrap()
}

fn wait_until(timeout: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if ready() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    ready()
}

#[test]
fn setup_assigns_ids_and_quit_releases_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let (server, pipe) = start_server(&dir);

    let first = connect(&dir, &pipe, "first");
    assert_eq!(first.session_id(), 0);
    assert_eq!(server.active_sessions(), 1);
    first.quit().unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || server.active_sessions() == 0),
        "session was not released after quit"
    );

    // Ids are never reused.
    let second = connect(&dir, &pipe, "second");
    assert_eq!(second.session_id(), 1);
    second.quit().unwrap();

    server.shutdown().unwrap();
    // The rendezvous pipe goes away with the server.
    assert!(!pipe.exists());
}

#[test]
fn create_then_show_returns_an_empty_grid() {
    let dir = tempfile::tempdir().unwrap();
    let (server, pipe) = start_server(&dir);
    let mut client = connect(&dir, &pipe, "c");

    client.create(7, 2, 3).unwrap();
    let view = client.show(7).unwrap();
    assert_eq!((view.rows, view.cols), (2, 3));
    assert_eq!(view.seats, vec![0; 6]);

    // A duplicate create is rejected but the session stays usable.
    assert!(matches!(
        client.create(7, 4, 4),
        Err(ClientError::Rejected(1))
    ));
    assert_eq!(client.show(7).unwrap().seats, vec![0; 6]);

    client.quit().unwrap();
    server.shutdown().unwrap();
}

#[test]
fn reserve_marks_exactly_the_requested_seats() {
    let dir = tempfile::tempdir().unwrap();
    let (server, pipe) = start_server(&dir);
    let mut client = connect(&dir, &pipe, "c");

    client.create(7, 2, 3).unwrap();
    client.reserve(7, &[(1, 1), (2, 3)]).unwrap();

    let view = client.show(7).unwrap();
    let reservation = view.seats[0];
    assert_ne!(reservation, 0);
    // Both seats carry the same reservation number; the rest stay free.
    assert_eq!(view.seats, vec![reservation, 0, 0, 0, 0, reservation]);

    client.quit().unwrap();
    server.shutdown().unwrap();
}

#[test]
fn failed_reserve_leaves_the_grid_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let (server, pipe) = start_server(&dir);
    let mut client = connect(&dir, &pipe, "c");

    client.create(7, 2, 3).unwrap();
    client.reserve(7, &[(1, 1), (2, 3)]).unwrap();
    let before = client.show(7).unwrap();

    // Row 5 is outside the grid; nothing may change.
    assert!(matches!(
        client.reserve(7, &[(1, 1), (5, 1)]),
        Err(ClientError::Rejected(1))
    ));
    assert_eq!(client.show(7).unwrap(), before);

    client.quit().unwrap();
    server.shutdown().unwrap();
}

#[test]
fn list_sees_events_created_by_other_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let (server, pipe) = start_server(&dir);

    let mut first = connect(&dir, &pipe, "first");
    let mut second = connect(&dir, &pipe, "second");
    first.create(7, 2, 3).unwrap();
    second.create(9, 1, 1).unwrap();

    let mut ids = first.list().unwrap();
    ids.sort_unstable();
    assert_eq!(ids, vec![7, 9]);

    first.quit().unwrap();
    second.quit().unwrap();
    server.shutdown().unwrap();
}

#[test]
fn a_misbehaving_session_does_not_poison_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let (server, pipe) = start_server(&dir);

    let mut healthy = connect(&dir, &pipe, "healthy");
    healthy.create(7, 2, 2).unwrap();

    let mut victim = connect(&dir, &pipe, "victim");
    // Slip an out-of-range opcode into the victim's request pipe; the
    // server must tear down only that session.
    {
        let mut raw = std::fs::OpenOptions::new()
            .write(true)
            .open(dir.path().join("victim.req"))
            .unwrap();
        raw.write_all(&99u32.to_ne_bytes()).unwrap();
    }
    assert!(
        wait_until(Duration::from_secs(5), || server.active_sessions() == 1),
        "misbehaving session was not torn down"
    );
    // The victim's next call fails on its closed pipes.
    assert!(matches!(victim.show(7), Err(ClientError::Io(_))));
    drop(victim);

    // Everyone else is unaffected.
    healthy.reserve(7, &[(1, 1)]).unwrap();
    assert_eq!(healthy.show(7).unwrap().seats, vec![1, 0, 0, 0]);

    healthy.quit().unwrap();
    server.shutdown().unwrap();
}

#[test]
fn saturated_pool_applies_backpressure() {
    let dir = tempfile::tempdir().unwrap();
    // One worker, one queue slot: the third connection parks in the
    // acceptor's blocked push until the pool drains.
    let (server, pipe) = start_server_with(&dir, |config| config.workers(1));
    let (done_tx, done_rx) = mpsc::channel::<&'static str>();

    let mut first = connect(&dir, &pipe, "first");
    first.create(7, 2, 2).unwrap();

    let spawn_client = |tag: &'static str, stagger: Duration| {
        let pipe = pipe.clone();
        let dir_path = dir.path().to_owned();
        let done = done_tx.clone();
        thread::spawn(move || {
            thread::sleep(stagger);
            let mut client = Client::connect(
                &pipe,
                &dir_path.join(format!("{tag}.req")),
                &dir_path.join(format!("{tag}.resp")),
            )
            .unwrap();
            client.show(7).unwrap();
            done.send(tag).unwrap();
            client.quit().unwrap();
        })
    };
    let second = spawn_client("second", Duration::ZERO);
    let third = spawn_client("third", Duration::from_millis(200));

    // While the first session holds the only worker, neither newcomer can
    // be adopted.
    assert!(
        done_rx.recv_timeout(Duration::from_millis(600)).is_err(),
        "a session was served while the pool was saturated"
    );

    // Releasing the worker drains the backlog in admission order.
    first.quit().unwrap();
    assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "second");
    assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "third");
    second.join().unwrap();
    third.join().unwrap();

    server.shutdown().unwrap();
}
