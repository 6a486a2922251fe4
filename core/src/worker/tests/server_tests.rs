//! End-to-end tests over a local socket

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use super::helpers::session_for;
use crate::worker::server::serve;
use crate::worker::spawn_worker;

async fn read_until(lines: &mut Lines<BufReader<OwnedReadHalf>>, last: &str) -> Vec<String> {
    let mut seen = Vec::new();
    while let Some(line) = lines.next_line().await.unwrap() {
        let done = line == last;
        seen.push(line);
        if done {
            break;
        }
    }
    seen
}

#[tokio::test(flavor = "multi_thread")]
async fn test_breakpoint_and_run_over_tcp() {
    let (session, _root) = session_for("INTEGER x = 1\nx = 2\nPRINT $x");
    let worker = spawn_worker(session).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, worker, async move {
        let _ = stop_rx.await;
    }));

    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    write.write_all(b"breakpt 2\n").await.unwrap();
    assert_eq!(
        read_until(&mut lines, "STATUS BREAKPT SET").await,
        vec!["STATUS BREAKPT SET"]
    );

    write.write_all(b"RUN\n").await.unwrap();
    let seen = read_until(&mut lines, "LINE 2").await;
    assert_eq!(seen, vec!["STATUS RUNNING", "STATUS BREAK", "LINE 2"]);

    let var = lines.next_line().await.unwrap().unwrap();
    assert!(var.starts_with("[VAR GLOBAL :: MAIN :: x :: Integer :: 1 :: 0 :: 1 :: "));

    write.write_all(b"JUMP\nBREAKPT soon\n").await.unwrap();
    let seen = read_until(&mut lines, "STATUS BREAKPT INVALID").await;
    assert!(seen.contains(&"STATUS ERROR: unknown command 'JUMP'".to_string()));

    write.write_all(b"RUN\n").await.unwrap();
    let seen = read_until(&mut lines, "STATUS EOF").await;
    assert_eq!(seen.first().map(String::as_str), Some("STATUS RUNNING"));

    drop(write);
    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}
