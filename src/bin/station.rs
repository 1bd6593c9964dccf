//! RadioLink 지상국
//!
//! SiK 시리얼 라디오와 UDP 브리지 WiFi 라디오를 열어 Rx/Tx 엔진을 돌린다.
//! - 수신 패킷 요약 로그
//! - 통계 스냅샷 주기 게시 (/dev/shm)
//! - 선택적으로 SiK 링크에 하트비트 송신
//!
//! 사용법:
//!   cargo run --release --bin radiolink-station -- [OPTIONS]
//!
//! 예시:
//!   # SiK 모뎀 하나
//!   cargo run --release --bin radiolink-station -- --serial /dev/ttyUSB0:57600
//!
//!   # SiK + WiFi 브리지, 1초마다 하트비트
//!   cargo run --release --bin radiolink-station -- -s /dev/ttyUSB0 \
//!       --udp 0.0.0.0:5600=127.0.0.1:5601 --heartbeat-ms 1000

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use radiolink::interface::{SerialRadio, UdpRadio};
use radiolink::packet::{encode_packet, PacketHeader};
use radiolink::{
    Config, InterfaceInfo, InterfaceKind, RadioStats, RxEngine, RxInterface, StatsPublisher,
    TxEngine, TxInterface, STREAM_ID_TELEMETRY,
};

/// 하트비트 패킷 타입
const PACKET_TYPE_HEARTBEAT: u8 = 0x20;

/// 기본 SiK 보드레이트
const DEFAULT_BAUD_RATE: u32 = 57600;

/// 지상국 설정
struct StationConfig {
    serial_ports: Vec<(String, u32)>,
    udp_links: Vec<(SocketAddr, SocketAddr)>,
    heartbeat_ms: Option<u64>,
    vehicle_id: u32,
    config: Config,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            serial_ports: Vec::new(),
            udp_links: Vec::new(),
            heartbeat_ms: None,
            vehicle_id: 1,
            config: Config::default(),
        }
    }
}

fn exit_with(msg: &str) -> ! {
    eprintln!("{}", msg);
    process::exit(2);
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, what: &str) -> T {
    match args.get(i + 1).map(|s| s.parse()) {
        Some(Ok(v)) => v,
        _ => exit_with(&format!("유효한 {} 필요", what)),
    }
}

fn parse_serial(arg: &str) -> (String, u32) {
    match arg.rsplit_once(':') {
        Some((path, baud)) if !path.is_empty() => match baud.parse() {
            Ok(baud) => (path.to_string(), baud),
            Err(_) => exit_with(&format!("유효한 보드레이트 필요: {}", arg)),
        },
        _ => (arg.to_string(), DEFAULT_BAUD_RATE),
    }
}

fn parse_udp(arg: &str) -> (SocketAddr, SocketAddr) {
    let parsed = arg
        .split_once('=')
        .and_then(|(l, r)| Some((l.parse().ok()?, r.parse().ok()?)));
    match parsed {
        Some(pair) => pair,
        None => exit_with(&format!("유효한 UDP 링크 필요 (LOCAL=REMOTE): {}", arg)),
    }
}

fn parse_args() -> StationConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = StationConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--serial" | "-s" => {
                let arg: String = parse_value(&args, i, "시리얼 포트");
                config.serial_ports.push(parse_serial(&arg));
                i += 1;
            }
            "--udp" | "-u" => {
                let arg: String = parse_value(&args, i, "UDP 링크");
                config.udp_links.push(parse_udp(&arg));
                i += 1;
            }
            "--preset" => {
                let preset: String = parse_value(&args, i, "프리셋");
                let stats_path = config.config.stats_path.clone();
                config.config = match preset.as_str() {
                    "long-range" => Config::long_range(),
                    "low-latency" => Config::low_latency(),
                    "default" => Config::default(),
                    other => exit_with(&format!("알 수 없는 프리셋: {}", other)),
                };
                config.config.stats_path = stats_path;
                i += 1;
            }
            "--sik-size" => {
                let size = parse_value(&args, i, "숫자");
                config.config.set_sik_packet_size(size);
                i += 1;
            }
            "--stats-path" => {
                config.config.stats_path = parse_value(&args, i, "경로");
                i += 1;
            }
            "--heartbeat-ms" => {
                config.heartbeat_ms = Some(parse_value(&args, i, "숫자"));
                i += 1;
            }
            "--vehicle-id" => {
                config.vehicle_id = parse_value(&args, i, "숫자");
                i += 1;
            }
            "--help" | "-h" => {
                println!(
                    r#"RadioLink Station - 장거리 FPV 라디오 링크 지상국

사용법:
  cargo run --release --bin radiolink-station -- [OPTIONS]

옵션:
  -s, --serial <PATH[:BAUD]>    SiK 시리얼 라디오 (반복 가능, 기본 보드레이트 57600)
  -u, --udp <LOCAL=REMOTE>      UDP 브리지 WiFi 라디오 (반복 가능)
  --preset <NAME>               default | long-range | low-latency
  --sik-size <BYTES>            SiK 짧은 패킷 크기 10~250 (기본: 50)
  --stats-path <PATH>           통계 스냅샷 경로 (기본: /dev/shm/radiolink_stats)
  --heartbeat-ms <MS>           SiK 링크 하트비트 주기
  --vehicle-id <ID>             송신 패킷의 차량 ID (기본: 1)
  -h, --help                    이 도움말 출력

로그 레벨은 RUST_LOG 환경 변수로 조정 (기본: info)
"#
                );
                process::exit(0);
            }
            other => warn!("알 수 없는 옵션 무시: {}", other),
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let station = parse_args();
    let config = station.config.clone();

    if station.serial_ports.is_empty() && station.udp_links.is_empty() {
        warn!("라디오 인터페이스가 지정되지 않음 (--help 참고)");
        return Ok(());
    }

    // 라디오 열기
    let mut infos = Vec::new();
    let mut rx_ifaces = Vec::new();
    let mut tx_ifaces = Vec::new();

    for (path, baud) in &station.serial_ports {
        let (reader, writer) = SerialRadio::open(path, *baud)?;
        let info = InterfaceInfo::new(path.clone(), InterfaceKind::SikSerial).with_link(infos.len());
        rx_ifaces.push(RxInterface::new(info.clone(), reader));
        tx_ifaces.push(TxInterface::new(info.clone(), writer));
        infos.push(info);
    }
    for (local, remote) in &station.udp_links {
        let (reader, writer) = UdpRadio::bind(*local, *remote)?;
        let info = InterfaceInfo::new(local.to_string(), InterfaceKind::WifiMonitor)
            .with_link(infos.len());
        rx_ifaces.push(RxInterface::new(info.clone(), reader));
        tx_ifaces.push(TxInterface::new(info.clone(), writer));
        infos.push(info);
    }

    info!("RadioLink Station 시작");
    info!("인터페이스: {}개", infos.len());
    info!("SiK 패킷 크기: {} bytes", config.sik_packet_size);
    info!("통계 경로: {}", config.stats_path);

    let stats = Arc::new(RadioStats::new(&infos));
    let mut rx = RxEngine::start(config.clone(), rx_ifaces, stats.clone())?;
    let mut tx = TxEngine::start(config.clone(), tx_ifaces, stats.clone())?;
    let publisher = StatsPublisher::new(&config.stats_path);

    let sik_ifaces: Vec<usize> = infos
        .iter()
        .enumerate()
        .filter(|(_, i)| i.kind.is_serial())
        .map(|(idx, _)| idx)
        .collect();

    let mut drain_tick = tokio::time::interval(Duration::from_millis(5));
    let mut publish_tick =
        tokio::time::interval(Duration::from_millis(config.stats_publish_interval_ms.max(10)));
    let mut status_tick = tokio::time::interval(Duration::from_secs(5));
    let mut heartbeat_tick =
        tokio::time::interval(Duration::from_millis(station.heartbeat_ms.unwrap_or(1000).max(1)));
    let heartbeat_enabled = station.heartbeat_ms.is_some() && !sik_ifaces.is_empty();
    let mut heartbeat_seq: u32 = 0;
    let mut received: u64 = 0;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("종료 신호 수신");
                break;
            }
            _ = drain_tick.tick() => {
                while let Some(entry) = rx.pop_next_packet() {
                    received += 1;
                    if let Some(header) = PacketHeader::read(&entry.data) {
                        debug!(
                            "수신: 인터페이스 {} 차량 {} 스트림 {} 인덱스 {} ({} bytes{})",
                            entry.interface,
                            header.vehicle_id_src,
                            header.stream_id(),
                            header.stream_seq(),
                            entry.len(),
                            if entry.is_short { ", SiK" } else { "" }
                        );
                        if rx.is_vehicle_restarted(header.vehicle_id_src) {
                            info!("차량 {} 재시작 감지", header.vehicle_id_src);
                            rx.reset_vehicle_restarted_flag(header.vehicle_id_src);
                        }
                    }
                }
            }
            _ = publish_tick.tick() => {
                publisher.publish_or_warn(&stats.snapshot());
            }
            _ = heartbeat_tick.tick(), if heartbeat_enabled => {
                let mut header = PacketHeader::new(PACKET_TYPE_HEARTBEAT, STREAM_ID_TELEMETRY, heartbeat_seq);
                header.vehicle_id_src = station.vehicle_id;
                let packet = encode_packet(&header, &heartbeat_seq.to_le_bytes());
                heartbeat_seq = heartbeat_seq.wrapping_add(1);
                for &index in &sik_ifaces {
                    if let Err(e) = tx.send_sik_packet(index, &packet) {
                        warn!("하트비트 송신 실패 (인터페이스 {}): {}", index, e);
                    }
                }
            }
            _ = status_tick.tick() => {
                let snapshot = stats.snapshot();
                info!("수신 {} 패킷 | {}", received, snapshot.summary());

                if let Some(index) = rx.any_interface_broken() {
                    warn!("인터페이스 {} 고장 상태, 재초기화 필요", index);
                }
                while let Some(index) = rx.any_rx_timeouts() {
                    debug!("인터페이스 {} 읽기 타임아웃 {}회", index, rx.take_rx_timeouts(index));
                }
                while let Some(index) = rx.any_bad_packets() {
                    info!("인터페이스 {} 불량 패킷 {}개", index, rx.take_bad_packets(index));
                }
                let loop_time = rx.take_max_loop_time();
                debug!("Rx 최대 루프 시간: {:.2}ms", loop_time.as_secs_f64() * 1000.0);
            }
        }
    }

    rx.stop();
    tx.stop();
    info!("총 수신 패킷: {}", received);

    Ok(())
}
