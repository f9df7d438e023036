use std::io::{Read, Write};
use std::net::TcpListener as StdTcpListener;
use std::thread;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use stevesroom::chat::{ChatLink, HttpChatClient, VisualState};
use stevesroom::dialogue::PendingRequest;
use stevesroom::rehearsal::{parse_rehearsal_script, Rehearsal};
use stevesroom::stage::StageSettings;
use stevesroom::timecodes::TimecodeTable;

const TIMEOUT: Duration = Duration::from_secs(5);

fn http_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// True once the headers and the whole body have arrived.
fn request_complete(buf: &[u8]) -> bool {
    let Some(header_end) = buf.windows(4).position(|window| window == b"\r\n\r\n") else {
        return false;
    };
    let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    buf.len() >= header_end + 4 + length
}

async fn serve_once(listener: TcpListener, response: String) -> String {
    let (mut socket, _) = listener.accept().await.expect("accept");
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 1024];
    while !request_complete(&buf) {
        let read = socket.read(&mut chunk).await.expect("read request");
        if read == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..read]);
    }
    socket
        .write_all(response.as_bytes())
        .await
        .expect("write response");
    let _ = socket.shutdown().await;
    String::from_utf8_lossy(&buf).into_owned()
}

fn serve_blocking(listener: StdTcpListener, responses: Vec<String>) -> thread::JoinHandle<Vec<String>> {
    thread::spawn(move || {
        let mut requests = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().expect("accept");
            let mut buf = Vec::new();
            let mut chunk = [0_u8; 1024];
            while !request_complete(&buf) {
                let read = socket.read(&mut chunk).expect("read request");
                if read == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..read]);
            }
            socket.write_all(response.as_bytes()).expect("write response");
            requests.push(String::from_utf8_lossy(&buf).into_owned());
        }
        requests
    })
}

async fn bind() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let endpoint = Url::parse(&format!("http://{addr}")).expect("endpoint");
    (listener, endpoint)
}

#[tokio::test]
async fn posts_message_and_parses_reply() {
    let (listener, endpoint) = bind().await;
    let server = tokio::spawn(serve_once(
        listener,
        http_response("200 OK", r#"{"dialogue":"Hey.","visualState":"bright"}"#),
    ));

    let client = HttpChatClient::new(&endpoint, TIMEOUT).expect("client");
    let reply = client.chat("hello steve").await.expect("reply");
    assert_eq!(reply.dialogue, "Hey.");
    assert_eq!(reply.visual_state, VisualState::Bright);

    let request = server.await.expect("server");
    assert!(request.starts_with("POST /chat HTTP/1.1"), "{request}");
    assert!(request.to_lowercase().contains("content-type: application/json"));
    assert!(request.ends_with(r#"{"message":"hello steve"}"#), "{request}");
}

#[tokio::test]
async fn error_status_is_a_failure() {
    let (listener, endpoint) = bind().await;
    let server = tokio::spawn(serve_once(
        listener,
        http_response("500 Internal Server Error", r#"{"error":"boom"}"#),
    ));

    let client = HttpChatClient::new(&endpoint, TIMEOUT).expect("client");
    let error = client.chat("hi").await.unwrap_err();
    assert!(format!("{error:#}").contains("error status"), "{error:#}");
    server.await.expect("server");
}

#[tokio::test]
async fn reply_without_dialogue_is_a_failure() {
    let (listener, endpoint) = bind().await;
    let server = tokio::spawn(serve_once(
        listener,
        http_response("200 OK", r#"{"visualState":"dark"}"#),
    ));

    let client = HttpChatClient::new(&endpoint, TIMEOUT).expect("client");
    let error = client.chat("hi").await.unwrap_err();
    assert!(format!("{error:#}").contains("failed to decode chat reply"), "{error:#}");
    server.await.expect("server");
}

#[tokio::test]
async fn unreachable_service_is_a_failure() {
    let (listener, endpoint) = bind().await;
    drop(listener);

    let client = HttpChatClient::new(&endpoint, TIMEOUT).expect("client");
    let error = client.chat("hi").await.unwrap_err();
    assert!(format!("{error:#}").contains("failed to reach the chat service"), "{error:#}");
}

#[test]
fn chat_link_delivers_outcome_tagged_with_generation() {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
    let endpoint = Url::parse(&format!("http://{}", listener.local_addr().expect("addr")))
        .expect("endpoint");
    let server = serve_blocking(
        listener,
        vec![http_response("200 OK", r#"{"dialogue":"...Hm.","visualState":"considering"}"#)],
    );

    let link = ChatLink::new(HttpChatClient::new(&endpoint, TIMEOUT).expect("client"))
        .expect("link");
    link.send(PendingRequest {
        generation: 7,
        message: "anything?".to_owned(),
    });

    let deadline = Instant::now() + TIMEOUT;
    let outcome = loop {
        if let Some(outcome) = link.try_recv() {
            break outcome;
        }
        assert!(Instant::now() < deadline, "no outcome before timeout");
        thread::sleep(Duration::from_millis(10));
    };
    assert_eq!(outcome.generation, 7);
    let reply = outcome.result.expect("reply");
    assert_eq!(reply.visual_state, VisualState::Considering);
    server.join().expect("server");
}

#[test]
fn live_rehearsal_uses_the_chat_service() {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
    let endpoint = Url::parse(&format!("http://{}", listener.local_addr().expect("addr")))
        .expect("endpoint");
    let server = serve_blocking(
        listener,
        vec![
            http_response("200 OK", r#"{"dialogue":"From the wire.","visualState":"dark"}"#),
            http_response("503 Service Unavailable", "{}"),
        ],
    );

    let steps = parse_rehearsal_script(
        "::start\n::pause 6s\n@user\nfirst\n@steve\nignored\n::pause 8s\n@user\nsecond\n",
    )
    .expect("script");
    let mut link = ChatLink::new(HttpChatClient::new(&endpoint, TIMEOUT).expect("client"))
        .expect("link");
    let report = Rehearsal::new(TimecodeTable::room(), 50.0, StageSettings::default())
        .run(&steps, &mut link)
        .expect("report");

    let steve = report.lines_for("steve");
    assert!(steve.contains(&"From the wire."), "{steve:?}");
    assert!(!steve.contains(&"ignored"));
    assert_eq!(report.lines_for("error").len(), 1);
    assert!(report.lines_for("video").contains(&"collapse"));

    let requests = server.join().expect("server");
    assert!(requests[0].ends_with(r#"{"message":"first"}"#));
    assert!(requests[1].ends_with(r#"{"message":"second"}"#));
}
