//! Minimal analyzer stand-in that honours the subject command line.
//!
//! The input's file name selects how it misbehaves. Analysis runs understand
//! `hang`, `flood`, `fail-<mode>` and `fail`; web runs understand
//! `silent-web` (no readiness line), `mute-web` (never answers) and
//! `busy-web` (reports a bind failure). Anything else succeeds. In web mode
//! an input whose contents start with `{` is served as the embedded JSON
//! payload.
//!
//! Hanging and serving processes write their pid to `<input>.pid`.

use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::time::Duration;

const DEFAULT_PAYLOAD: &str = r#"{"name":"fake","size":1,"packages":[],"sections":[]}"#;

#[derive(Debug, Default)]
struct Args {
    format: Option<String>,
    output: Option<String>,
    web: bool,
    listen: Option<String>,
    input: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut out = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-f" => out.format = Some(it.next().ok_or("-f needs a value")?),
            "-o" => out.output = Some(it.next().ok_or("-o needs a value")?),
            "--indent" => {
                it.next().ok_or("--indent needs a value")?;
            }
            "--listen" => out.listen = Some(it.next().ok_or("--listen needs a value")?),
            "--web" => out.web = true,
            "--verbose" | "--hide-progress" => {}
            "--version" => {
                println!("fake-subject 0.0.0");
                std::process::exit(0);
            }
            other if other.starts_with('-') => return Err(format!("unknown flag {other}")),
            other => out.input = Some(other.to_string()),
        }
    }
    Ok(out)
}

fn behavior(input: &str) -> String {
    std::path::Path::new(input)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn payload(input: &str) -> String {
    match std::fs::read_to_string(input) {
        Ok(text) if text.trim_start().starts_with('{') => text,
        _ => DEFAULT_PAYLOAD.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Web {
    Normal,
    Silent,
    Mute,
}

fn write_pid(input: &str) -> Result<(), String> {
    let path = format!("{input}.pid");
    std::fs::write(&path, std::process::id().to_string()).map_err(|e| format!("write {path}: {e}"))
}

fn serve(listener: TcpListener, web: Web, payload: &str) -> io::Result<()> {
    let port = listener.local_addr()?.port();
    if web != Web::Silent {
        println!("level=INFO msg=\"Server started\" url=http://localhost:{port}");
        io::stdout().flush()?;
    }
    let page = format!(
        "<!doctype html><html><head><title>fake</title>\
<script type=\"application/json\">{payload}</script></head><body></body></html>"
    );
    let mut held = Vec::new();
    for stream in listener.incoming() {
        let mut stream = stream?;
        if web == Web::Mute {
            held.push(stream);
            continue;
        }
        stream.set_read_timeout(Some(Duration::from_secs(1)))?;
        let mut buf = [0u8; 4096];
        let _ = stream.read(&mut buf);
        let resp = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{page}",
            page.len()
        );
        stream.write_all(resp.as_bytes())?;
        stream.flush()?;
    }
    Ok(())
}

fn run_web(listen: &str, input: &str, behavior: &str) -> Result<i32, String> {
    if behavior.starts_with("busy-web") {
        println!("level=ERROR msg=\"listen tcp {listen}: bind: address already in use\"");
        return Ok(1);
    }
    let listener = match TcpListener::bind(listen) {
        Ok(listener) => listener,
        Err(e) => {
            println!("level=ERROR msg=\"listen tcp {listen}: {e}\"");
            return Ok(1);
        }
    };
    write_pid(input)?;
    let web = if behavior.starts_with("silent-web") {
        Web::Silent
    } else if behavior.starts_with("mute-web") {
        Web::Mute
    } else {
        Web::Normal
    };
    serve(listener, web, &payload(input)).map_err(|e| format!("serve: {e}"))?;
    Ok(0)
}

fn run() -> Result<i32, String> {
    let args = parse_args()?;
    let input = args.input.clone().ok_or("missing input path")?;
    let behavior = behavior(&input);

    if args.web {
        let listen = args.listen.ok_or("--web needs --listen")?;
        return run_web(&listen, &input, &behavior);
    }

    let format = args.format.unwrap_or_else(|| "text".to_string());
    println!("level=INFO msg=\"analyzing\" file={input} format={format}");
    eprintln!("level=INFO msg=\"progress\" done=100%");

    let fail_mode = behavior
        .strip_prefix("fail-")
        .is_some_and(|rest| rest.starts_with(format.as_str()));
    match behavior.as_str() {
        b if b.starts_with("hang") => {
            write_pid(&input)?;
            loop {
                std::thread::sleep(Duration::from_secs(60));
            }
        }
        b if b.starts_with("flood") => {
            let line = "x".repeat(99);
            let mut out = io::stdout().lock();
            for _ in 0..2000 {
                writeln!(out, "{line}").map_err(|e| e.to_string())?;
            }
        }
        _ if fail_mode => {
            println!("level=ERROR msg=\"{format} output failed\"");
            return Ok(2);
        }
        b if b.starts_with("fail") && !b.starts_with("fail-") => {
            println!("level=ERROR msg=\"analysis failed\"");
            return Ok(1);
        }
        _ => {}
    }

    if let Some(path) = args.output {
        std::fs::write(&path, format!("{format} report for {input}\n"))
            .map_err(|e| format!("write {path}: {e}"))?;
    }
    Ok(0)
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("fake-subject: {e}");
            std::process::exit(64);
        }
    }
}
