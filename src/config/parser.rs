use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use super::ast::*;
use crate::error::ConfigError;
use crate::http::{Method, StatusCode};

type Result<T> = std::result::Result<T, ConfigError>;

fn syntax(msg: impl Into<String>) -> ConfigError {
    ConfigError::Syntax(msg.into())
}

#[derive(Debug, Clone)]
enum Token {
    Ident(String),
    StringLit(String),
    Number(u64),
    LBrace,
    RBrace,
    Semi,
}

/// Parses a configuration file body. Relative paths are resolved against
/// `base_dir`, normally the directory holding the file.
pub fn parse_config(input: &str, base_dir: &Path) -> Result<Config> {
    let tokens = tokenize(input)?;
    let mut p = Parser { tokens, pos: 0, base_dir };
    let cfg = p.parse_config()?;

    if cfg.servers.is_empty() {
        return Err(ConfigError::Invalid("no servers defined".into()));
    }
    Ok(cfg)
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '{' => { chars.next(); tokens.push(Token::LBrace); }
            '}' => { chars.next(); tokens.push(Token::RBrace); }
            ';' => { chars.next(); tokens.push(Token::Semi); }
            '#' => {
                for ch in chars.by_ref() {
                    if ch == '\n' {
                        break;
                    }
                }
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut terminated = false;
                for ch in chars.by_ref() {
                    if ch == '"' {
                        terminated = true;
                        break;
                    }
                    s.push(ch);
                }
                if !terminated {
                    return Err(syntax("unterminated string literal"));
                }
                tokens.push(Token::StringLit(s));
            }
            c if c.is_ascii_whitespace() => { chars.next(); }
            _ => {
                let mut s = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_whitespace() || ch == '{' || ch == '}' || ch == ';' {
                        break;
                    }
                    s.push(ch);
                    chars.next();
                }
                if !s.is_empty() && s.chars().all(|ch| ch.is_ascii_digit()) {
                    let n = s.parse::<u64>().map_err(|e| syntax(format!("{s}: {e}")))?;
                    tokens.push(Token::Number(n));
                } else {
                    tokens.push(Token::Ident(s));
                }
            }
        }
    }
    Ok(tokens)
}

/// A location as written, before server-level defaults are applied.
struct LocationBlock {
    uri: String,
    root: Option<PathBuf>,
    kind: Option<LocationKind>,
    methods: Option<AllowedMethods>,
    autoindex: bool,
    upload_folder: Option<PathBuf>,
    index: Option<Vec<String>>,
}

impl LocationBlock {
    fn finish(self, server_root: &Path, server_index: &[String]) -> Location {
        Location {
            uri: self.uri,
            root: self.root.unwrap_or_else(|| server_root.to_path_buf()),
            kind: self.kind.unwrap_or(LocationKind::Standard),
            methods: self.methods.unwrap_or_default(),
            autoindex: self.autoindex,
            upload_folder: self.upload_folder,
            index: self.index.unwrap_or_else(|| server_index.to_vec()),
        }
    }

    fn set_kind(&mut self, kind: LocationKind) -> Result<()> {
        if self.kind.is_some() {
            return Err(ConfigError::Invalid(format!(
                "location {} declares more than one of redirect, cgi, proxy_pass, alias",
                self.uri
            )));
        }
        self.kind = Some(kind);
        Ok(())
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    base_dir: &'a Path,
}

impl<'a> Parser<'a> {
    fn parse_config(&mut self) -> Result<Config> {
        let mut servers = Vec::new();
        while !self.is_end() {
            match self.peek() {
                Some(Token::Ident(s)) if s == "server" => {
                    self.next();
                    self.expect(Token::LBrace)?;
                    servers.push(self.parse_server(servers.len())?);
                }
                Some(tok) => return Err(syntax(format!("unexpected token at top level: {:?}", tok))),
                None => break,
            }
        }
        Ok(Config { servers })
    }

    fn parse_server(&mut self, ordinal: usize) -> Result<VirtualServer> {
        let mut listen: Option<SocketAddr> = None;
        let mut host: Option<IpAddr> = None;
        let mut server_names = Vec::new();
        let mut root = None;
        let mut index = Vec::new();
        let mut error_pages = HashMap::new();
        let mut blocks = Vec::new();
        let mut client_max_body_size = DEFAULT_CLIENT_MAX_BODY_SIZE;

        loop {
            match self.peek() {
                Some(Token::RBrace) => { self.next(); break; }
                Some(Token::Ident(s)) if s == "listen" => {
                    self.next();
                    if listen.is_some() {
                        return Err(ConfigError::Invalid(format!(
                            "server #{ordinal} has more than one listen directive"
                        )));
                    }
                    listen = Some(self.parse_listen_value()?);
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "host" => {
                    self.next();
                    let v = self.expect_stringish()?;
                    host = Some(v.parse().map_err(|_| syntax(format!("invalid host address {v}")))?);
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "server_name" => {
                    self.next();
                    server_names.extend(self.parse_words("server_name")?);
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "root" => {
                    self.next();
                    root = Some(self.parse_path()?);
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "index" => {
                    self.next();
                    index = self.parse_words("index")?;
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "error_page" => {
                    self.next();
                    let mut codes = vec![self.expect_number_u16()?];
                    while let Some(Token::Number(_)) = self.peek() {
                        codes.push(self.expect_number_u16()?);
                    }
                    let path = PathBuf::from(self.expect_stringish()?);
                    for code in codes {
                        error_pages.insert(code, path.clone());
                    }
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "client_max_body_size" => {
                    self.next();
                    client_max_body_size = self.parse_size()?;
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "location" => {
                    self.next();
                    let uri = self.expect_stringish()?;
                    if !uri.starts_with('/') {
                        return Err(ConfigError::Invalid(format!("location {uri} must start with '/'")));
                    }
                    self.expect(Token::LBrace)?;
                    blocks.push(self.parse_location(uri)?);
                }
                Some(tok) => return Err(syntax(format!("unknown directive in server: {:?}", tok))),
                None => return Err(syntax("unexpected end of file in server block")),
            }
        }

        let listen = listen.ok_or_else(|| {
            ConfigError::Invalid(format!("server #{ordinal} is missing a listen directive"))
        })?;
        let root = root.unwrap_or_else(|| self.base_dir.to_path_buf());

        // Error pages are looked up like URIs, below the server root.
        let error_pages = error_pages
            .into_iter()
            .map(|(code, path): (u16, PathBuf)| {
                let rel = path.strip_prefix("/").unwrap_or(&path).to_path_buf();
                (code, root.join(rel))
            })
            .collect();

        let locations = blocks
            .into_iter()
            .map(|b| b.finish(&root, &index))
            .collect();

        Ok(VirtualServer {
            host: host.unwrap_or_else(|| listen.ip()),
            port: listen.port(),
            server_names,
            client_max_body_size,
            error_pages,
            root,
            locations,
        })
    }

    fn parse_location(&mut self, uri: String) -> Result<LocationBlock> {
        let mut block = LocationBlock {
            uri,
            root: None,
            kind: None,
            methods: None,
            autoindex: false,
            upload_folder: None,
            index: None,
        };

        loop {
            match self.peek() {
                Some(Token::RBrace) => { self.next(); break; }
                Some(Token::Ident(s)) if s == "root" => {
                    self.next();
                    block.root = Some(self.parse_path()?);
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "methods" => {
                    self.next();
                    let mut allowed = AllowedMethods::NONE;
                    for m in self.parse_words("methods")? {
                        allowed.allow(self.parse_method(&m)?);
                    }
                    block.methods = Some(allowed);
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "autoindex" => {
                    self.next();
                    let v = self.expect_ident()?.to_lowercase();
                    block.autoindex = match v.as_str() {
                        "on" => true,
                        "off" => false,
                        _ => return Err(syntax("autoindex expects on|off")),
                    };
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "index" => {
                    self.next();
                    block.index = Some(self.parse_words("index")?);
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "upload_folder" => {
                    self.next();
                    block.upload_folder = Some(PathBuf::from(self.expect_stringish()?));
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "redirect" => {
                    self.next();
                    let status = match self.peek() {
                        Some(Token::Number(_)) => {
                            let code = self.expect_number_u16()?;
                            StatusCode::redirect_from_u16(code)
                                .ok_or_else(|| syntax(format!("{code} is not a redirect status")))?
                        }
                        _ => StatusCode::MovedPermanently,
                    };
                    let target = self.expect_stringish()?;
                    block.set_kind(LocationKind::Redirect { status, target })?;
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "cgi" => {
                    self.next();
                    let interpreter = match self.peek() {
                        Some(Token::Semi) => None,
                        _ => Some(PathBuf::from(self.expect_stringish()?)),
                    };
                    block.set_kind(LocationKind::Cgi { interpreter })?;
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "proxy_pass" => {
                    self.next();
                    let target = self.expect_stringish()?;
                    block.set_kind(LocationKind::Proxy { target })?;
                    self.expect(Token::Semi)?;
                }
                Some(Token::Ident(s)) if s == "alias" => {
                    self.next();
                    let target = self.parse_path()?;
                    block.set_kind(LocationKind::Alias { target })?;
                    self.expect(Token::Semi)?;
                }
                Some(tok) => return Err(syntax(format!("unknown directive in location: {:?}", tok))),
                None => return Err(syntax("unexpected end of file in location block")),
            }
        }

        Ok(block)
    }

    fn parse_listen_value(&mut self) -> Result<SocketAddr> {
        match self.next() {
            Some(Token::Ident(s)) | Some(Token::StringLit(s)) => self.parse_socket_addr(&s),
            Some(Token::Number(n)) => {
                let port = u16::try_from(n).map_err(|_| syntax(format!("port {n} out of range")))?;
                Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
            }
            other => Err(syntax(format!("expected listen address, got {:?}", other))),
        }
    }

    fn parse_socket_addr(&self, s: &str) -> Result<SocketAddr> {
        if let Ok(a) = s.parse::<SocketAddr>() {
            return Ok(a);
        }
        if let Some((host, port)) = s.rsplit_once(':') {
            if host == "localhost" {
                if let Ok(port) = port.parse::<u16>() {
                    return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port));
                }
            }
        }
        Err(syntax(format!("invalid listen address: {s}")))
    }

    /// `client_max_body_size` accepts a byte count with an optional k, m or g
    /// suffix.
    fn parse_size(&mut self) -> Result<u64> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Ident(s)) => {
                let (digits, unit) = s.split_at(s.len().saturating_sub(1));
                let mult = match unit.to_ascii_lowercase().as_str() {
                    "k" => 1024,
                    "m" => 1024 * 1024,
                    "g" => 1024 * 1024 * 1024,
                    _ => return Err(syntax(format!("invalid size {s}"))),
                };
                let n: u64 = digits.parse().map_err(|_| syntax(format!("invalid size {s}")))?;
                Ok(n * mult)
            }
            other => Err(syntax(format!("expected size, got {:?}", other))),
        }
    }

    fn parse_path(&mut self) -> Result<PathBuf> {
        let p = self.expect_stringish()?;
        let pb = PathBuf::from(&p);
        if pb.is_absolute() {
            Ok(pb)
        } else {
            Ok(self.base_dir.join(pb))
        }
    }

    fn parse_words(&mut self, directive: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Semi) => break,
                Some(Token::Ident(v)) | Some(Token::StringLit(v)) => {
                    out.push(v.clone());
                    self.next();
                }
                other => return Err(syntax(format!("unexpected in {directive}: {:?}", other))),
            }
        }
        Ok(out)
    }

    fn parse_method(&self, s: &str) -> Result<Method> {
        Method::parse(&s.to_uppercase()).ok_or_else(|| syntax(format!("unsupported method {s}")))
    }

    // token helpers
    fn peek(&self) -> Option<&Token> { self.tokens.get(self.pos) }
    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() { self.pos += 1; }
        t
    }
    fn expect(&mut self, want: Token) -> Result<()> {
        let got = self.next().ok_or_else(|| syntax("unexpected end of file"))?;
        if std::mem::discriminant(&got) == std::mem::discriminant(&want) {
            Ok(())
        } else {
            Err(syntax(format!("expected {:?}, got {:?}", want, got)))
        }
    }
    fn expect_ident(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Ident(s)) => Ok(s),
            other => Err(syntax(format!("expected identifier, got {:?}", other))),
        }
    }
    fn expect_stringish(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Ident(s)) => Ok(s),
            Some(Token::StringLit(s)) => Ok(s),
            other => Err(syntax(format!("expected string, got {:?}", other))),
        }
    }
    fn expect_number_u16(&mut self) -> Result<u16> {
        match self.next() {
            Some(Token::Number(n)) => {
                u16::try_from(n).map_err(|_| syntax(format!("{n} out of range")))
            }
            other => Err(syntax(format!("expected number, got {:?}", other))),
        }
    }
    fn is_end(&self) -> bool { self.pos >= self.tokens.len() }
}
