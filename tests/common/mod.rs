#![allow(dead_code)]

use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tempfile::TempDir;
use webserv::{parse_config, Server, ServerOptions};

pub struct TestServer {
    pub port: u16,
    pub dir: TempDir,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn path(&self, rel: &str) -> std::path::PathBuf {
        self.dir.path().join(rel)
    }

    pub fn send(&self, raw: &[u8]) -> Vec<u8> {
        let mut stream = self.connect();
        stream.write_all(raw).unwrap();
        read_all(&mut stream)
    }

    pub fn get(&self, path: &str) -> Vec<u8> {
        self.send(format!("GET {path} HTTP/1.1\r\nHost: localhost:{}\r\n\r\n", self.port).as_bytes())
    }

    pub fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(("127.0.0.1", self.port)).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        stream
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

/// Lays out a small site: static files, a listing directory, error pages
/// and shell CGI scripts.
pub fn build_site(dir: &Path) {
    let www = dir.join("www");
    for sub in ["files", "errors", "cgi-bin", "static"] {
        fs::create_dir_all(www.join(sub)).unwrap();
    }
    fs::create_dir_all(dir.join("other")).unwrap();

    fs::write(www.join("index.html"), "<h1>home</h1>").unwrap();
    fs::write(www.join("static/app.css"), "body{}").unwrap();
    fs::write(www.join("files/listed.txt"), "listed").unwrap();
    fs::write(www.join("files/trash.txt"), "trash").unwrap();
    fs::write(www.join("errors/403.html"), "custom forbidden").unwrap();
    fs::write(dir.join("other/index.html"), "<h1>other</h1>").unwrap();

    let cgi = www.join("cgi-bin");
    fs::write(cgi.join("hello.sh"), "printf Hello\n").unwrap();
    fs::write(
        cgi.join("echo.sh"),
        "printf 'HTTP/1.1 200 OK\\r\\nContent-Type: text/plain\\r\\n\\r\\n'\n\
         printf '%s %s %s ' \"$REQUEST_METHOD\" \"$QUERY_STRING\" \"$CONTENT_LENGTH\"\n\
         cat\n",
    )
    .unwrap();
    fs::write(cgi.join("slow.sh"), "echo $$ > slow.pid\nexec sleep 30\n").unwrap();
}

pub fn site_config(port: u16) -> String {
    format!(
        r#"
        server {{
            listen 127.0.0.1:{port};
            server_name localhost;
            root www;
            index index.html;
            client_max_body_size 64;
            error_page 403 /errors/403.html;

            location / {{ methods GET HEAD POST DELETE; upload_folder uploads; }}
            location /files {{ autoindex on; index none.html; methods GET DELETE; }}
            location /static {{ methods GET; }}
            location /old {{ redirect 302 /index.html; }}
            location /cgi-bin {{ cgi /bin/sh; methods GET POST HEAD; }}
            location /api {{ proxy_pass 127.0.0.1:{port}; }}
        }}
        server {{
            listen 127.0.0.1:{port};
            server_name other.test;
            root other;
            index index.html;
            location / {{ }}
        }}
        "#
    )
}

pub fn start(options: ServerOptions) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    build_site(dir.path());
    let port = free_port();
    let config = parse_config(&site_config(port), dir.path()).unwrap();
    let mut server = Server::bind(config, options).unwrap();

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let handle = thread::spawn(move || {
        server.run(&flag).unwrap();
    });

    TestServer {
        port,
        dir,
        shutdown,
        handle: Some(handle),
    }
}

pub fn start_default() -> TestServer {
    start(ServerOptions::default())
}

pub fn read_all(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let _ = stream.read_to_end(&mut out);
    out
}

pub fn status(resp: &[u8]) -> u16 {
    let text = String::from_utf8_lossy(resp);
    text.split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

pub fn header(resp: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(resp).into_owned();
    let head = text.split("\r\n\r\n").next().unwrap_or("");
    head.lines().skip(1).find_map(|line| {
        let (k, v) = line.split_once(':')?;
        k.trim().eq_ignore_ascii_case(name).then(|| v.trim().to_string())
    })
}

pub fn body(resp: &[u8]) -> &[u8] {
    match resp.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(idx) => &resp[idx + 4..],
        None => &[],
    }
}

/// Drops the connection with an RST instead of a FIN.
pub fn reset(stream: TcpStream) {
    use std::os::fd::AsRawFd;

    let linger = libc::linger { l_onoff: 1, l_linger: 0 };
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &linger as *const libc::linger as *const libc::c_void,
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    };
    assert_eq!(rc, 0);
    drop(stream);
}

/// Polls until `pid` no longer exists.
pub fn wait_for_exit(pid: i32, within: Duration) -> bool {
    let deadline = std::time::Instant::now() + within;
    while std::time::Instant::now() < deadline {
        if unsafe { libc::kill(pid, 0) } != 0 {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

pub fn wait_for_file(path: &Path, within: Duration) -> String {
    let deadline = std::time::Instant::now() + within;
    loop {
        if let Ok(text) = fs::read_to_string(path) {
            if text.ends_with('\n') {
                return text;
            }
        }
        assert!(std::time::Instant::now() < deadline, "{} never appeared", path.display());
        thread::sleep(Duration::from_millis(20));
    }
}
