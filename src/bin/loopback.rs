//! RadioLink 루프백 시뮬레이션
//!
//! 메모리 내 라디오로 Tx → Rx 전체 경로를 돌려본다.
//! - SiK 링크: Tx 엔진 조각화 → 손실 주입 → Rx 재조립
//! - WiFi 링크 여러 개: 같은 패킷을 중복 송신 → Rx 중복 제거
//! - 선택적으로 중간에 기체 재시작 (스트림 인덱스 0부터 다시)
//!
//! 사용법:
//!   cargo run --release --bin radiolink-loopback -- [OPTIONS]

use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use radiolink::interface::loopback;
use radiolink::packet::{encode_packet, PacketHeader};
use radiolink::{
    Config, InterfaceInfo, InterfaceKind, RadioStats, RadioWriter, RxEngine, RxInterface,
    TxEngine, TxInterface, STREAM_ID_DATA,
};

/// 시뮬레이션 패킷 타입
const PACKET_TYPE_SIM: u8 = 0x21;

/// 시뮬레이션 설정
struct SimConfig {
    packets: u32,
    payload: usize,
    loss: f64,
    wifi_links: usize,
    restart_at: Option<u32>,
    interval: Duration,
    config: Config,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            packets: 500,
            payload: 120,
            loss: 0.02,
            wifi_links: 2,
            restart_at: None,
            interval: Duration::from_millis(2),
            config: Config {
                tx_fragment_delay_us: 100,
                ..Config::default()
            },
        }
    }
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, what: &str) -> T {
    match args.get(i + 1).map(|s| s.parse()) {
        Some(Ok(v)) => v,
        _ => {
            eprintln!("유효한 {} 필요", what);
            process::exit(2);
        }
    }
}

fn parse_args() -> SimConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = SimConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--packets" | "-n" => {
                config.packets = parse_value(&args, i, "숫자");
                i += 1;
            }
            "--payload" => {
                config.payload = parse_value(&args, i, "숫자");
                i += 1;
            }
            "--loss" => {
                config.loss = parse_value(&args, i, "확률");
                i += 1;
            }
            "--wifi-links" => {
                config.wifi_links = parse_value(&args, i, "숫자");
                i += 1;
            }
            "--restart-at" => {
                config.restart_at = Some(parse_value(&args, i, "숫자"));
                i += 1;
            }
            "--interval-ms" => {
                config.interval = Duration::from_millis(parse_value(&args, i, "숫자"));
                i += 1;
            }
            "--sik-size" => {
                let size = parse_value(&args, i, "숫자");
                config.config.set_sik_packet_size(size);
                i += 1;
            }
            "--help" | "-h" => {
                println!(
                    r#"RadioLink Loopback - 메모리 내 라디오 시뮬레이션

사용법:
  cargo run --release --bin radiolink-loopback -- [OPTIONS]

옵션:
  -n, --packets <N>       송신 패킷 수 (기본: 500)
  --payload <BYTES>       페이로드 크기 (기본: 120)
  --loss <P>              SiK 조각 손실 확률 0.0~1.0 (기본: 0.02)
  --wifi-links <N>        중복 WiFi 링크 수 (기본: 2)
  --restart-at <N>        N번째 패킷 후 기체 재시작 시뮬레이션
  --interval-ms <MS>      패킷 간격 (기본: 2)
  --sik-size <BYTES>      SiK 짧은 패킷 크기 (기본: 50)
  -h, --help              이 도움말 출력
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

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let sim = parse_args();
    let payload_len = sim
        .payload
        .min(radiolink::MAX_PACKET_TOTAL_SIZE - radiolink::packet::PACKET_HEADER_SIZE);

    info!("RadioLink 루프백 시뮬레이션");
    info!(
        "패킷 {}개, 페이로드 {} bytes, SiK 손실 {:.1}%, WiFi 링크 {}개",
        sim.packets,
        payload_len,
        sim.loss * 100.0,
        sim.wifi_links
    );

    // SiK 링크 (Tx 엔진 경유)
    let (sik_writer, sik_reader, sik_control) = loopback(InterfaceKind::SikSerial);
    sik_control.set_loss(sim.loss);
    let sik_info = InterfaceInfo::new("sim-sik0", InterfaceKind::SikSerial).with_link(0);

    let mut infos = vec![sik_info.clone()];
    let mut rx_ifaces = vec![RxInterface::new(sik_info.clone(), sik_reader)];
    let mut wifi_writers = Vec::new();
    for n in 0..sim.wifi_links {
        let (writer, reader, _control) = loopback(InterfaceKind::WifiMonitor);
        let info = InterfaceInfo::new(format!("sim-wlan{}", n), InterfaceKind::WifiMonitor)
            .with_link(n + 1);
        rx_ifaces.push(RxInterface::new(info.clone(), reader));
        infos.push(info);
        wifi_writers.push(writer);
    }

    let stats = Arc::new(RadioStats::new(&infos));
    let mut rx = RxEngine::start(sim.config.clone(), rx_ifaces, stats.clone())?;
    let mut tx = TxEngine::start(
        sim.config.clone(),
        vec![TxInterface::new(sik_info, sik_writer)],
        stats.clone(),
    )?;

    let vehicle_id = 7;
    let mut rng = rand::thread_rng();
    let mut seq: u32 = 0;
    let mut link_index: u32 = 0;
    let mut received: u64 = 0;
    let mut restarts: u32 = 0;
    let started = Instant::now();

    let drain = |rx: &RxEngine, received: &mut u64, restarts: &mut u32| {
        while rx.pop_next_packet().is_some() {
            *received += 1;
        }
        if rx.is_vehicle_restarted(vehicle_id) {
            *restarts += 1;
            info!("차량 {} 재시작 감지", vehicle_id);
            rx.reset_vehicle_restarted_flag(vehicle_id);
        }
    };

    for n in 0..sim.packets {
        if sim.restart_at == Some(n) {
            info!("기체 재시작 시뮬레이션: 인덱스 {} → 0", seq);
            seq = 0;
        }

        let mut header = PacketHeader::new(PACKET_TYPE_SIM, STREAM_ID_DATA, seq);
        header.vehicle_id_src = vehicle_id;
        let payload: Vec<u8> = (0..payload_len).map(|_| rng.gen()).collect();

        if let Err(e) = tx.send_sik_packet(0, &encode_packet(&header, &payload)) {
            warn!("SiK 송신 실패: {}", e);
        }
        for writer in &mut wifi_writers {
            header.radio_link_packet_index = link_index;
            writer.write(&encode_packet(&header, &payload))?;
        }

        seq += 1;
        link_index += 1;
        thread::sleep(sim.interval);
        drain(&rx, &mut received, &mut restarts);
    }

    // 잔여 패킷 처리 대기
    let deadline = Instant::now() + Duration::from_millis(500);
    while Instant::now() < deadline && (tx.pending_messages() > 0 || rx.pending_packets() > 0) {
        thread::sleep(Duration::from_millis(10));
        drain(&rx, &mut received, &mut restarts);
    }
    thread::sleep(Duration::from_millis(50));
    drain(&rx, &mut received, &mut restarts);

    tx.stop();
    rx.stop();

    let snapshot = stats.snapshot();
    let elapsed = started.elapsed();
    info!("═══════════════════════════════════════");
    info!("소요 시간: {:.2}s", elapsed.as_secs_f64());
    info!("송신 패킷: {}", sim.packets);
    info!("수신 패킷 (중복 제거 후): {}", received);
    info!("재시작 감지: {}회", restarts);
    for iface in &snapshot.interfaces {
        info!(
            "{}: 고유 {} / 중복 {} / 불량 {} / 손실 {}",
            iface.name,
            iface.unique_packets,
            iface.duplicate_packets,
            iface.bad_packets,
            iface.lost_packets
        );
    }
    info!("{}", snapshot.summary());

    Ok(())
}
