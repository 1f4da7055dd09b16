//! End-to-end tests over loopback TCP
//!
//! Starts a real runtime, connects plain TCP clients to it and plays a
//! fake device server, checking the protocol as peers see it.

use std::sync::Arc;
use std::time::Duration;

use telemon_core::{DeviceConfig, LogKind, MonitorConfig, PeerConfig, PollCommand};
use telemon_runtime::{RuntimeBuilder, RuntimeHandle};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

mod test_utils;
use test_utils::RecordingSink;

const WAIT: Duration = Duration::from_secs(5);

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(runtime: &RuntimeHandle) -> Self {
        let addr = runtime.local_addr().expect("runtime should listen");
        Self::from_stream(TcpStream::connect(addr).await.unwrap())
    }

    fn from_stream(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> String {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
            .expect("link closed")
    }

    /// Complete the identity handshake as `name`
    async fn identify(&mut self, name: &str, role: &str) {
        assert_eq!(self.recv().await, "id name=monitor role=monitor");
        assert_eq!(self.recv().await, "get_id");
        self.send(&format!("id name={name} role={role}")).await;
    }
}

fn server_config() -> MonitorConfig {
    let mut config = MonitorConfig {
        server: true,
        bind_address: "127.0.0.1".into(),
        port: 0,
        peer_poll_interval_ms: 3_600_000,
        ..MonitorConfig::default()
    };
    config.peers.insert("ccd1".into(), PeerConfig::default());
    config
}

async fn start(config: MonitorConfig) -> RuntimeHandle {
    RuntimeBuilder::new(config).build_and_start().await.unwrap()
}

/// Poll the aggregated view until `pred` holds
async fn wait_for_status(runtime: &RuntimeHandle, pred: impl Fn(&serde_json::Value) -> bool) {
    timeout(WAIT, async {
        loop {
            let status = runtime.global_status().await.unwrap().to_json();
            if pred(&status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("status never matched");
}

#[tokio::test]
async fn test_peer_status_over_tcp() {
    let mut runtime = start(server_config()).await;
    let mut ccd1 = Client::connect(&runtime).await;

    ccd1.identify("ccd1", "producer").await;
    ccd1.send("status temp=20.5 state=idle").await;

    wait_for_status(&runtime, |status| status["ccd1"]["temp"] == "20.5").await;

    ccd1.send("get_status").await;
    let line = ccd1.recv().await;
    assert!(line.starts_with("status nconnected=1"));
    assert!(line.contains("ccd1.state=idle"));

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_send_relays_between_peers() {
    let mut runtime = start(server_config()).await;
    let mut ccd1 = Client::connect(&runtime).await;
    let mut dome = Client::connect(&runtime).await;
    ccd1.identify("ccd1", "ccd").await;
    dome.identify("dome", "dome").await;

    // Make sure both identities are processed before routing
    dome.send("get_id").await;
    assert_eq!(dome.recv().await, "id name=monitor role=monitor");

    ccd1.send("send dome close").await;
    assert_eq!(dome.recv().await, "close");

    let delivered = runtime.send_to("ccd1", "abort").await.unwrap();
    assert!(delivered);
    assert_eq!(ccd1.recv().await, "abort");

    assert_eq!(runtime.broadcast("park", Some("dome")).await.unwrap(), 1);
    assert_eq!(dome.recv().await, "park");

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_clears_peer_from_view() {
    let mut runtime = start(server_config()).await;
    let mut logs = runtime.subscribe_logs();
    let mut ccd1 = Client::connect(&runtime).await;
    ccd1.identify("ccd1", "ccd").await;
    ccd1.send("status temp=1").await;
    wait_for_status(&runtime, |status| status["ccd1"]["temp"] == "1").await;

    drop(ccd1);
    wait_for_status(&runtime, |status| status["nconnected"] == 0).await;

    let messages: Vec<String> = std::iter::from_fn(|| logs.try_recv().ok())
        .map(|record| record.message)
        .collect();
    assert_eq!(messages, ["ccd1 connected", "ccd1 disconnected"]);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_input_keeps_link_open() {
    let mut runtime = start(server_config()).await;
    let mut ccd1 = Client::connect(&runtime).await;
    ccd1.identify("ccd1", "ccd").await;

    ccd1.writer.write_all(b"status note=\xff\xfe\n").await.unwrap();
    wait_for_status(&runtime, |status| status["ccd1"]["note"] == "\u{FFFD}\u{FFFD}").await;
    ccd1.send("status temp=1").await;
    wait_for_status(&runtime, |status| status["ccd1"]["temp"] == "1").await;

    let oversized = format!("status junk={}\n", "x".repeat(telemon_runtime::transport::MAX_LINE_LEN));
    ccd1.writer.write_all(oversized.as_bytes()).await.unwrap();
    ccd1.send("status temp=2").await;
    wait_for_status(&runtime, |status| status["ccd1"]["temp"] == "2").await;

    let status = runtime.global_status().await.unwrap().to_json();
    assert_eq!(status["nconnected"], 1);
    assert!(status["ccd1"].get("junk").is_none());

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_device_polling_and_console_query() {
    let device_server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let device_port = device_server.local_addr().unwrap().port();

    let mut config = server_config();
    config.devices.insert(
        "hw".into(),
        DeviceConfig {
            host: "127.0.0.1".into(),
            port: device_port,
            init: vec!["*RST".into()],
            poll: vec![PollCommand::new("V1O?", "V1")],
            ..DeviceConfig::default()
        },
    );
    let sink = Arc::new(RecordingSink::default());
    let mut runtime = RuntimeBuilder::new(config)
        .with_sink(sink.clone())
        .build_and_start()
        .await
        .unwrap();
    let mut console = runtime.attach_output("console").await.unwrap();

    let (stream, _) = timeout(WAIT, device_server.accept()).await.unwrap().unwrap();
    let mut device = Client::from_stream(stream);
    assert_eq!(device.recv().await, "*RST");

    // Poll cycle
    assert_eq!(device.recv().await, "V1O?");
    device.send("12.000V").await;
    wait_for_status(&runtime, |status| status["hw"]["V1"] == "12.000").await;

    // A console query is answered on the console
    runtime.execute("send hw CONFIG?", "console").await.unwrap();
    // Keep answering polls until the query comes through
    loop {
        let line = device.recv().await;
        if line == "CONFIG?" {
            break;
        }
        assert_eq!(line, "V1O?");
        device.send("12.000V").await;
    }
    device.send("2").await;
    let reply = timeout(WAIT, console.recv()).await.unwrap();
    assert_eq!(reply.as_deref(), Some("2"));

    runtime
        .log("device checked", "console", LogKind::Success)
        .await
        .unwrap();
    drop(device);
    wait_for_status(&runtime, |status| status["hw"] == serde_json::json!({})).await;
    assert!(sink
        .logs()
        .iter()
        .any(|record| record.message == "device checked" && record.kind == LogKind::Success));

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_status_log_file_receives_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("status.jsonl");
    let mut config = server_config();
    config.status_log = Some(path.to_string_lossy().into_owned());

    let mut runtime = start(config).await;
    let mut ccd1 = Client::connect(&runtime).await;
    ccd1.identify("ccd1", "ccd").await;
    ccd1.send("status temp=7").await;
    wait_for_status(&runtime, |status| status["ccd1"]["temp"] == "7").await;
    runtime.shutdown().await.unwrap();

    let contents = tokio::fs::read_to_string(&path).await.unwrap();
    let records: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert!(records
        .iter()
        .any(|r| r["kind"] == "status" && r["status"]["ccd1"]["temp"] == "7"));
    assert!(records
        .iter()
        .any(|r| r["kind"] == "log" && r["msg"] == "ccd1 connected"));
}
