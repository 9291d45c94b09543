use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::{
    net::SocketAddr,
    path::PathBuf,
    time::{Duration, Instant},
};
use tidewire::{ClientTls, Context, ContextConfig, Internal, MessageId, NetError, Result, ServerTls};

fn main() -> Result<()> {
    env_logger::init();

    let matches = Command::new("tidewire-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Tidewire message transport CLI Tool")
        .subcommand_required(true)
        .subcommand(
            Command::new("serve")
                .about("Run an echo server")
                .arg(
                    Arg::new("addr")
                        .short('a')
                        .long("addr")
                        .value_name("ADDR")
                        .help("Address to listen on")
                        .default_value("127.0.0.1:7000")
                        .value_parser(value_parser!(SocketAddr)),
                )
                .arg(
                    Arg::new("raw")
                        .long("raw")
                        .help("Echo raw byte chunks instead of length-prefixed frames")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("max_connections")
                        .short('m')
                        .long("max-connections")
                        .value_name("COUNT")
                        .help("Connection pool capacity")
                        .default_value("256")
                        .value_parser(value_parser!(u16)),
                )
                .arg(
                    Arg::new("cert")
                        .long("cert")
                        .value_name("FILE")
                        .help("PEM certificate chain (requires the tls feature)")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("key")
                        .long("key")
                        .value_name("FILE")
                        .help("PEM private key (requires the tls feature)")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("send")
                .about("Send messages to a server and print the replies")
                .arg(
                    Arg::new("addr")
                        .short('a')
                        .long("addr")
                        .value_name("ADDR")
                        .help("Server address")
                        .default_value("127.0.0.1:7000")
                        .value_parser(value_parser!(SocketAddr)),
                )
                .arg(
                    Arg::new("message")
                        .short('m')
                        .long("message")
                        .value_name("TEXT")
                        .help("Payload to send")
                        .default_value("hello"),
                )
                .arg(
                    Arg::new("count")
                        .short('c')
                        .long("count")
                        .value_name("COUNT")
                        .help("Number of messages")
                        .default_value("1")
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("timeout")
                        .short('t')
                        .long("timeout")
                        .value_name("MS")
                        .help("How long to wait for replies")
                        .default_value("2000")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("raw")
                        .long("raw")
                        .help("Send raw bytes instead of length-prefixed frames")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("ca")
                        .long("ca")
                        .value_name("FILE")
                        .help("Connect with TLS, trusting this PEM certificate (requires the tls feature)")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("serve", serve_matches)) => handle_serve(serve_matches),
        Some(("send", send_matches)) => handle_send(send_matches),
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn addr_arg(matches: &ArgMatches) -> Result<SocketAddr> {
    matches
        .get_one::<SocketAddr>("addr")
        .copied()
        .ok_or_else(|| NetError::invalid_parameter("addr", "Missing address"))
}

#[cfg(feature = "tls")]
fn server_tls(matches: &ArgMatches) -> Result<Option<ServerTls>> {
    match (matches.get_one::<PathBuf>("cert"), matches.get_one::<PathBuf>("key")) {
        (Some(cert), Some(key)) => Ok(Some(ServerTls::from_pem_files(cert, key)?)),
        (None, None) => Ok(None),
        _ => Err(NetError::invalid_parameter("cert", "--cert and --key must be given together")),
    }
}

#[cfg(not(feature = "tls"))]
fn server_tls(matches: &ArgMatches) -> Result<Option<ServerTls>> {
    if matches.contains_id("cert") || matches.contains_id("key") {
        return Err(NetError::invalid_parameter("cert", "Built without TLS support"));
    }
    Ok(None)
}

#[cfg(feature = "tls")]
fn client_tls(matches: &ArgMatches) -> Result<Option<ClientTls>> {
    matches
        .get_one::<PathBuf>("ca")
        .map(|ca| ClientTls::from_root_pem_files(&[ca]))
        .transpose()
}

#[cfg(not(feature = "tls"))]
fn client_tls(matches: &ArgMatches) -> Result<Option<ClientTls>> {
    if matches.contains_id("ca") {
        return Err(NetError::invalid_parameter("ca", "Built without TLS support"));
    }
    Ok(None)
}

fn handle_serve(matches: &ArgMatches) -> Result<()> {
    let addr = addr_arg(matches)?;
    let raw = matches.get_flag("raw");
    let max_connections = matches.get_one::<u16>("max_connections").copied().unwrap_or(256);
    let tls = server_tls(matches)?;
    let secure = tls.is_some();

    let mut ctx = Context::new(ContextConfig::default().with_max_connections(max_connections))?;
    let listen = ctx.listen(addr, raw, tls)?;
    println!(
        "Echo server listening on {} ({}{})",
        ctx.local_addr(listen)?,
        if raw { "raw" } else { "framed" },
        if secure { ", TLS" } else { "" }
    );

    let mut last_report = Instant::now();
    loop {
        ctx.update(Duration::from_millis(100))?;

        while let Some(msg) = ctx.recv() {
            let handle = msg.handle();
            match msg.internal() {
                Internal::Disconnect => println!("{} disconnected", handle),
                Internal::Notify if msg.id() == Some(MessageId::AcceptFailed) => {
                    println!("Refused a connection: pool full");
                }
                Internal::Notify => {}
                Internal::None => {
                    let Some(mut reply) = ctx.alloc(handle, msg.len() as u16) else {
                        log::warn!("message budget exhausted, dropping echo for {}", handle);
                        continue;
                    };
                    reply.data_mut().copy_from_slice(msg.data());
                    ctx.release(msg);
                    if let Err(err) = ctx.send(reply) {
                        log::debug!("echo to {} failed: {}", handle, err);
                    }
                }
            }
        }

        if last_report.elapsed() >= Duration::from_secs(10) {
            log::info!("{}", ctx.stats().summary());
            last_report = Instant::now();
        }
    }
}

fn handle_send(matches: &ArgMatches) -> Result<()> {
    let addr = addr_arg(matches)?;
    let raw = matches.get_flag("raw");
    let count = matches.get_one::<u32>("count").copied().unwrap_or(1);
    let timeout = Duration::from_millis(matches.get_one::<u64>("timeout").copied().unwrap_or(2000));
    let payload = matches
        .get_one::<String>("message")
        .map(|text| text.as_bytes().to_vec())
        .unwrap_or_default();
    if payload.len() > u16::MAX as usize {
        return Err(NetError::invalid_parameter("message", "Payload exceeds 65535 bytes"));
    }

    let mut config = ContextConfig::default().with_max_listen_sockets(0).with_max_connections(1);
    let tls = client_tls(matches)?;
    let secure = tls.is_some();
    if let Some(tls) = tls {
        config = config.with_client_tls(tls);
    }

    let mut ctx = Context::new(config)?;
    let handle = ctx.connect(addr, raw, secure)?;

    for _ in 0..count {
        let mut msg = ctx
            .alloc(handle, payload.len() as u16)
            .ok_or_else(|| NetError::out_of_memory(payload.len()))?;
        msg.data_mut().copy_from_slice(&payload);
        ctx.send(msg)?;
    }
    ctx.notify(handle, count as u64)?;

    let start = Instant::now();
    let deadline = start + timeout;
    let mut replies = 0u32;
    let mut delivered = false;
    while Instant::now() < deadline && !(delivered && replies >= count) {
        let Some(msg) = ctx.wait(deadline.saturating_duration_since(Instant::now()))? else {
            break;
        };
        match msg.internal() {
            Internal::Notify => {
                delivered = true;
                println!("Sent {} messages in {:.2}ms", count, start.elapsed().as_secs_f64() * 1000.0);
            }
            Internal::Disconnect => {
                println!("Connection closed ({:?})", msg.id());
                return Ok(());
            }
            Internal::None => {
                replies += 1;
                println!("Reply {}: {}", replies, String::from_utf8_lossy(msg.data()));
            }
        }
    }

    println!("{}", ctx.stats().summary());
    ctx.disconnect(handle, true)?;
    ctx.wait(Duration::from_millis(100))?;
    Ok(())
}
