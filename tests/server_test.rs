mod common;

use std::fs;
use std::io::Write;
use std::net::Shutdown;
use std::thread;
use std::time::Duration;

use common::{body, header, start, start_default, status, wait_for_exit, wait_for_file};
use webserv::ServerOptions;

#[test]
fn serves_index_for_root() {
    let srv = start_default();
    let resp = srv.get("/");
    assert_eq!(status(&resp), 200);
    assert_eq!(body(&resp), b"<h1>home</h1>");
    assert_eq!(header(&resp, "Content-Type").as_deref(), Some("text/html; charset=utf-8"));
    assert_eq!(header(&resp, "Content-Length").as_deref(), Some("13"));
    assert_eq!(header(&resp, "Connection").as_deref(), Some("close"));
}

#[test]
fn head_reports_length_without_body() {
    let srv = start_default();
    let resp = srv.send(b"HEAD /static/app.css HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(status(&resp), 200);
    assert_eq!(header(&resp, "Content-Length").as_deref(), Some("6"));
    assert!(body(&resp).is_empty());
}

#[test]
fn missing_file_gets_generated_error_page() {
    let srv = start_default();
    let resp = srv.get("/nope.html");
    assert_eq!(status(&resp), 404);
    assert!(String::from_utf8_lossy(body(&resp)).contains("ERROR - 404"));
}

#[test]
fn configured_error_page_is_served_with_original_status() {
    let srv = start_default();
    let resp = srv.send(b"DELETE /files HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(status(&resp), 403);
    assert_eq!(body(&resp), b"custom forbidden");
}

#[test]
fn host_header_selects_virtual_server() {
    let srv = start_default();
    let resp = srv.send(b"GET / HTTP/1.1\r\nHost: other.test\r\n\r\n");
    assert_eq!(status(&resp), 200);
    assert_eq!(body(&resp), b"<h1>other</h1>");

    let resp = srv.send(b"GET / HTTP/1.1\r\nHost: unknown.test\r\n\r\n");
    assert_eq!(body(&resp), b"<h1>home</h1>");
}

#[test]
fn request_validation_statuses() {
    let srv = start_default();
    let cases: [(&[u8], u16); 5] = [
        (b"garbage\r\n\r\n", 400),
        (b"GET / HTTP/2.0\r\n\r\n", 505),
        (b"BREW /pot HTTP/1.1\r\n\r\n", 501),
        (b"POST /static/app.css HTTP/1.1\r\nContent-Length: 0\r\n\r\n", 405),
        (b"GET /../etc/passwd HTTP/1.1\r\n\r\n", 404),
    ];
    for (raw, expected) in cases {
        assert_eq!(status(&srv.send(raw)), expected, "{}", String::from_utf8_lossy(raw));
    }
}

#[test]
fn oversized_body_is_rejected_from_the_head_alone() {
    let srv = start_default();
    let head = format!("POST /up.txt HTTP/1.1\r\nHost: localhost:{}\r\nContent-Length: 100000\r\n\r\n", srv.port);
    let resp = srv.send(head.as_bytes());
    assert_eq!(status(&resp), 413);
    assert!(!srv.path("www/uploads/up.txt").exists());
}

#[test]
fn oversized_body_is_rejected_while_still_streaming() {
    let srv = start_default();
    let mut stream = srv.connect();
    let mut first =
        format!("POST /up.txt HTTP/1.1\r\nHost: localhost:{}\r\nContent-Length: 100000\r\n\r\n", srv.port).into_bytes();
    first.extend_from_slice(&[b'a'; 1024]);
    stream.write_all(&first).unwrap();

    let resp = common::read_all(&mut stream);
    assert_eq!(status(&resp), 413);

    // The server closed its side; the rest of the body goes nowhere.
    let refused = (0..50).any(|_| {
        let sent = stream.write_all(&[b'a'; 4096]);
        thread::sleep(Duration::from_millis(10));
        sent.is_err()
    });
    assert!(refused, "server kept accepting body bytes");
    assert!(!srv.path("www/uploads/up.txt").exists());
}

#[test]
fn oversized_body_with_unknown_host_uses_default_server_limit() {
    let srv = start_default();
    let resp = srv.send(b"POST /up.txt HTTP/1.1\r\nHost: nobody.test\r\nContent-Length: 1000000000000000\r\n\r\n");
    assert_eq!(status(&resp), 413);

    let resp = srv.send(b"POST /up.txt HTTP/1.1\r\nContent-Length: 100000\r\n\r\n");
    assert_eq!(status(&resp), 413);
}

#[test]
fn content_length_overflow_is_a_bad_request() {
    let srv = start_default();
    let resp = srv.send(b"GET / HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\n");
    assert_eq!(status(&resp), 400);
    assert_eq!(status(&srv.get("/")), 200);
}

#[test]
fn redirect_location_is_sent() {
    let srv = start_default();
    let resp = srv.get("/old");
    assert_eq!(status(&resp), 302);
    assert_eq!(header(&resp, "Location").as_deref(), Some("/index.html"));
}

#[test]
fn request_split_across_writes_is_reassembled() {
    let srv = start_default();
    let mut stream = srv.connect();
    let chunks: [&[u8]; 4] = [b"GET /sta", b"tic/app.css HTTP/1.1\r\nHo", b"st: localhost\r\n", b"\r\n"];
    for chunk in chunks {
        stream.write_all(chunk).unwrap();
        thread::sleep(Duration::from_millis(50));
    }
    let resp = common::read_all(&mut stream);
    assert_eq!(status(&resp), 200);
    assert_eq!(body(&resp), b"body{}");
}

#[test]
fn autoindex_lists_directory() {
    let srv = start_default();
    let resp = srv.get("/files/");
    assert_eq!(status(&resp), 200);
    let html = String::from_utf8_lossy(body(&resp)).into_owned();
    assert!(html.contains("listed.txt"));
    assert!(html.contains("trash.txt"));
}

#[test]
fn upload_then_delete() {
    let srv = start_default();
    let resp = srv.send(b"POST /note.txt HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello");
    assert_eq!(status(&resp), 201);
    assert_eq!(fs::read(srv.path("www/uploads/note.txt")).unwrap(), b"hello");

    let resp = srv.send(b"DELETE /files/trash.txt HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(status(&resp), 200);
    assert!(!srv.path("www/files/trash.txt").exists());

    let resp = srv.send(b"DELETE /files/trash.txt HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(status(&resp), 404);
}

#[test]
fn proxy_location_answers_bad_gateway() {
    let srv = start_default();
    let resp = srv.get("/api/users");
    assert_eq!(status(&resp), 502);
    assert!(String::from_utf8_lossy(body(&resp)).contains("ERROR - 502"));
}

#[test]
fn cgi_output_is_passed_through_verbatim() {
    let srv = start_default();
    let resp = srv.get("/cgi-bin/hello.sh");
    assert_eq!(resp, b"Hello");
}

#[test]
fn cgi_answers_client_that_closed_its_write_side() {
    let srv = start_default();
    let mut stream = srv.connect();
    stream.write_all(b"GET /cgi-bin/hello.sh HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
    stream.shutdown(Shutdown::Write).unwrap();
    assert_eq!(common::read_all(&mut stream), b"Hello");
}

#[test]
fn cgi_receives_body_and_environment() {
    let srv = start_default();
    let resp = srv.send(b"POST /cgi-bin/echo.sh?x=1 HTTP/1.1\r\nHost: localhost\r\nContent-Length: 3\r\n\r\nabc");
    assert_eq!(status(&resp), 200);
    assert_eq!(body(&resp), b"POST x=1 3 abc");
}

#[test]
fn cgi_timeout_kills_script_and_answers_504() {
    let srv = start(ServerOptions {
        cgi_timeout: Duration::from_secs(1),
        ..ServerOptions::default()
    });
    let resp = srv.get("/cgi-bin/slow.sh");
    assert_eq!(status(&resp), 504);

    let pid: i32 = wait_for_file(&srv.path("www/cgi-bin/slow.pid"), Duration::from_secs(5))
        .trim()
        .parse()
        .unwrap();
    assert!(wait_for_exit(pid, Duration::from_secs(5)), "script {pid} still alive");
}

#[test]
fn client_leaving_during_cgi_kills_the_script() {
    let srv = start_default();
    let mut stream = srv.connect();
    stream.write_all(b"GET /cgi-bin/slow.sh HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
    let pid: i32 = wait_for_file(&srv.path("www/cgi-bin/slow.pid"), Duration::from_secs(5))
        .trim()
        .parse()
        .unwrap();
    common::reset(stream);

    assert!(wait_for_exit(pid, Duration::from_secs(5)), "script {pid} still alive");
    assert_eq!(status(&srv.get("/")), 200);
}

#[test]
fn client_leaving_mid_body_does_not_disturb_others() {
    let srv = start_default();
    let mut stream = srv.connect();
    stream
        .write_all(b"POST /x.txt HTTP/1.1\r\nHost: localhost\r\nContent-Length: 50\r\n\r\nonly-some")
        .unwrap();
    drop(stream);
    thread::sleep(Duration::from_millis(100));

    assert_eq!(status(&srv.get("/")), 200);
    assert!(!srv.path("www/uploads/x.txt").exists());
}

#[test]
fn idle_client_gets_request_timeout() {
    let srv = start(ServerOptions {
        client_timeout: Duration::from_secs(1),
        ..ServerOptions::default()
    });
    let mut stream = srv.connect();
    stream.write_all(b"GET / HT").unwrap();
    let resp = common::read_all(&mut stream);
    assert_eq!(status(&resp), 408);
}
