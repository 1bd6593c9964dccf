//! Tx 엔진
//!
//! 외부 생산자가 넣은 전체 패킷을 SiK 짧은 패킷으로 쪼개
//! 시리얼 라디오에 페이싱하며 쓴다. 전용 스레드 하나가 유일한 소비자.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use tracing::{debug, error, info, warn};

use crate::config::clamp_sik_packet_size;
use crate::interface::{InterfaceInfo, InterfaceKind, RadioWriter, TxInterface};
use crate::sched;
use crate::sik::ShortPacketFragmenter;
use crate::stats::RadioStats;
use crate::{Config, Error, Result, TxError, MAX_PACKET_TOTAL_SIZE, MAX_RADIO_INTERFACES};

/// 보류 중인 우선순위 변경 없음
const NO_PRIORITY: i32 = i32::MIN;

/// Tx 큐 메시지
#[derive(Debug, Clone)]
struct TxMessage {
    interface: usize,
    data: Bytes,
}

/// 핸들과 워커가 공유하는 인터페이스 상태
struct TxShared {
    paused: Vec<AtomicU32>,
    packet_size: Vec<AtomicUsize>,
    pending_priority: AtomicI32,
}

/// Tx 큐 생산자 핸들 (여러 스레드에서 복제해 사용)
#[derive(Clone)]
pub struct TxSender {
    queue: Sender<TxMessage>,
    kinds: Arc<Vec<InterfaceKind>>,
    running: Arc<AtomicBool>,
    retries: u32,
    retry_sleep: Duration,
}

impl TxSender {
    /// 전체 패킷을 SiK 인터페이스 큐에 넣는다
    ///
    /// 큐가 가득 차면 짧게 쉬며 재시도한 뒤 `QueueFull`.
    pub fn send_sik_packet(&self, interface: usize, data: &[u8]) -> std::result::Result<(), TxError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(TxError::Stopped);
        }
        match self.kinds.get(interface) {
            Some(kind) if kind.is_serial() => {}
            _ => return Err(TxError::InvalidInterface { index: interface }),
        }
        if data.is_empty() || data.len() > MAX_PACKET_TOTAL_SIZE {
            return Err(TxError::InvalidPacket { len: data.len() });
        }

        let mut msg = TxMessage {
            interface,
            data: Bytes::copy_from_slice(data),
        };
        for attempt in 0..=self.retries {
            match self.queue.try_send(msg) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) => {
                    msg = back;
                    if attempt < self.retries {
                        thread::sleep(self.retry_sleep);
                    }
                }
                Err(TrySendError::Disconnected(_)) => return Err(TxError::Stopped),
            }
        }

        warn!(
            "Tx 큐 가득 참: 인터페이스 {} 패킷 {} bytes 거부",
            interface,
            data.len()
        );
        Err(TxError::QueueFull)
    }

    /// 큐에 대기 중인 메시지 수
    pub fn pending_messages(&self) -> usize {
        self.queue.len()
    }
}

struct TxPort {
    info: InterfaceInfo,
    writer: Option<Box<dyn RadioWriter>>,
    fragmenter: ShortPacketFragmenter,
}

struct TxWorker {
    config: Config,
    ports: Vec<TxPort>,
    queue: Receiver<TxMessage>,
    shared: Arc<TxShared>,
    stats: Arc<RadioStats>,
    running: Arc<AtomicBool>,
}

impl TxWorker {
    fn run(mut self) {
        if let Some(priority) = self.config.tx_thread_priority {
            sched::raise_current_thread_priority("tx", priority);
        }
        info!("Tx 스레드 시작: 인터페이스 {}개", self.ports.len());

        let min = Duration::from_millis(self.config.tx_backoff_min_ms);
        let max = Duration::from_millis(self.config.tx_backoff_max_ms);
        let step = Duration::from_millis(self.config.tx_backoff_step_ms);
        let mut backoff = min;

        while self.running.load(Ordering::SeqCst) {
            let priority = self.shared.pending_priority.swap(NO_PRIORITY, Ordering::Relaxed);
            if priority != NO_PRIORITY {
                sched::raise_current_thread_priority("tx", priority);
            }

            match self.queue.try_recv() {
                Ok(msg) => {
                    backoff = min;
                    self.dispatch(msg);
                }
                Err(TryRecvError::Empty) => {
                    thread::sleep(backoff);
                    backoff = (backoff + step).min(max);
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }

        let left = self.queue.len();
        if left > 0 {
            info!("Tx 스레드 종료: 미전송 메시지 {}개 버림", left);
        } else {
            info!("Tx 스레드 종료");
        }
    }

    fn dispatch(&mut self, msg: TxMessage) {
        let index = msg.interface;
        if self.shared.paused[index].load(Ordering::Relaxed) > 0 {
            debug!("Tx 인터페이스 {} 일시정지 중, 패킷 버림", index);
            return;
        }

        let packet_size = self.shared.packet_size[index].load(Ordering::Relaxed);
        let delay = self.config.tx_fragment_delay();
        let port = &mut self.ports[index];
        let Some(writer) = port.writer.as_mut() else {
            warn!("Tx 인터페이스 {} ({}) 쓰기 불가", index, port.info.name);
            return;
        };

        let frames = port.fragmenter.fragment(&msg.data, packet_size);
        let count = frames.len();
        for (i, frame) in frames.iter().enumerate() {
            match writer.write(frame) {
                Ok(written) => {
                    if written < frame.len() {
                        warn!(
                            "Tx 인터페이스 {} 부분 쓰기: {}/{} bytes",
                            index,
                            written,
                            frame.len()
                        );
                    }
                    self.stats.record_tx(index, written);
                }
                Err(e) => {
                    error!("Tx 인터페이스 {} 쓰기 실패: {}", index, e);
                    return;
                }
            }
            if i + 1 < count && !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    }
}

/// Tx 엔진 핸들
pub struct TxEngine {
    sender: TxSender,
    shared: Arc<TxShared>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    interfaces: Vec<InterfaceInfo>,
}

impl TxEngine {
    /// Tx 스레드 시작
    pub fn start(
        config: Config,
        interfaces: Vec<TxInterface>,
        stats: Arc<RadioStats>,
    ) -> Result<Self> {
        if interfaces.is_empty() {
            return Err(Error::NoInterface);
        }
        if interfaces.len() > MAX_RADIO_INTERFACES {
            return Err(Error::InvalidInterface {
                index: MAX_RADIO_INTERFACES,
            });
        }

        let infos: Vec<InterfaceInfo> = interfaces.iter().map(|i| i.info.clone()).collect();
        let packet_size = clamp_sik_packet_size(config.sik_packet_size);
        let shared = Arc::new(TxShared {
            paused: infos.iter().map(|_| AtomicU32::new(0)).collect(),
            packet_size: infos.iter().map(|_| AtomicUsize::new(packet_size)).collect(),
            pending_priority: AtomicI32::new(NO_PRIORITY),
        });
        let running = Arc::new(AtomicBool::new(true));
        let (queue_tx, queue_rx) = bounded(config.tx_queue_capacity.max(1));

        let sender = TxSender {
            queue: queue_tx,
            kinds: Arc::new(infos.iter().map(|i| i.kind).collect()),
            running: running.clone(),
            retries: config.tx_enqueue_retries,
            retry_sleep: Duration::from_millis(config.tx_retry_sleep_ms),
        };

        let worker = TxWorker {
            ports: interfaces
                .into_iter()
                .map(|i| TxPort {
                    info: i.info,
                    writer: i.writer,
                    fragmenter: ShortPacketFragmenter::new(),
                })
                .collect(),
            queue: queue_rx,
            shared: shared.clone(),
            stats,
            running: running.clone(),
            config,
        };

        let handle = thread::Builder::new()
            .name("radiolink-tx".into())
            .spawn(move || worker.run())
            .map_err(|e| Error::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            sender,
            shared,
            running,
            handle: Some(handle),
            interfaces: infos,
        })
    }

    pub fn interfaces(&self) -> &[InterfaceInfo] {
        &self.interfaces
    }

    /// 생산자 핸들 복제
    pub fn sender(&self) -> TxSender {
        self.sender.clone()
    }

    pub fn send_sik_packet(&self, interface: usize, data: &[u8]) -> std::result::Result<(), TxError> {
        self.sender.send_sik_packet(interface, data)
    }

    pub fn pending_messages(&self) -> usize {
        self.sender.pending_messages()
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.interfaces.len() {
            Ok(())
        } else {
            Err(Error::InvalidInterface { index })
        }
    }

    /// 인터페이스 일시정지 (중첩 가능, 그동안 들어온 패킷은 버림)
    pub fn pause_interface(&self, index: usize) -> Result<()> {
        self.check_index(index)?;
        let count = self.shared.paused[index].fetch_add(1, Ordering::Relaxed) + 1;
        info!("Tx 인터페이스 {} 일시정지 (count {})", index, count);
        Ok(())
    }

    pub fn resume_interface(&self, index: usize) -> Result<()> {
        self.check_index(index)?;
        let prev = self.shared.paused[index]
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some(c.saturating_sub(1)))
            .unwrap_or(0);
        info!(
            "Tx 인터페이스 {} 재개 (count {})",
            index,
            prev.saturating_sub(1)
        );
        Ok(())
    }

    pub fn is_interface_paused(&self, index: usize) -> bool {
        self.shared
            .paused
            .get(index)
            .is_some_and(|c| c.load(Ordering::Relaxed) > 0)
    }

    /// SiK 패킷 크기 변경 (범위 밖이면 기본값), 적용된 값 반환
    pub fn set_sik_packet_size(&self, index: usize, size: usize) -> Result<usize> {
        self.check_index(index)?;
        let size = clamp_sik_packet_size(size);
        self.shared.packet_size[index].store(size, Ordering::Relaxed);
        info!("Tx 인터페이스 {} SiK 패킷 크기 {}", index, size);
        Ok(size)
    }

    pub fn sik_packet_size(&self, index: usize) -> Option<usize> {
        self.shared
            .packet_size
            .get(index)
            .map(|s| s.load(Ordering::Relaxed))
    }

    /// Tx 스레드 우선순위 변경 (다음 루프에서 적용)
    pub fn set_thread_priority(&self, priority: i32) {
        self.shared
            .pending_priority
            .store(priority.max(NO_PRIORITY + 1), Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 정지 (스레드 종료까지 대기)
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Tx 스레드 패닉");
            }
        }
    }
}

impl Drop for TxEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{loopback, LoopbackReader, RadioReader};
    use crate::packet::{encode_packet, PacketHeader};
    use crate::sik::{AssemblyOutcome, ScanEvent, SerialFrameScanner, ShortPacketAssembler};
    use std::io;

    fn test_config() -> Config {
        Config {
            tx_fragment_delay_us: 0,
            ..Config::default()
        }
    }

    fn start_serial(config: Config) -> (TxEngine, LoopbackReader, Arc<RadioStats>) {
        let (w, r, _c) = loopback(InterfaceKind::SikSerial);
        let info = InterfaceInfo::new("sik0", InterfaceKind::SikSerial);
        let stats = Arc::new(RadioStats::new(std::slice::from_ref(&info)));
        let engine = TxEngine::start(config, vec![TxInterface::new(info, w)], stats.clone()).unwrap();
        (engine, r, stats)
    }

    fn full_packet(seq: u32, len: usize) -> Bytes {
        let header = PacketHeader::new(7, 0, seq);
        encode_packet(&header, &vec![0xA5; len])
    }

    fn collect_packets(reader: &mut LoopbackReader, expected: usize) -> Vec<Bytes> {
        let mut scanner = SerialFrameScanner::default();
        let mut asm = ShortPacketAssembler::new();
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        for _ in 0..400 {
            if out.len() >= expected {
                break;
            }
            if let Ok(n) = reader.read(&mut buf) {
                scanner.extend(&buf[..n]);
            }
            while let Some(event) = scanner.next_event() {
                if let ScanEvent::Frame { header, data, .. } = event {
                    if let AssemblyOutcome::Complete(p) = asm.push(&header, &data).outcome {
                        out.push(p);
                    }
                }
            }
            thread::sleep(Duration::from_millis(5));
        }
        out
    }

    fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        for _ in 0..400 {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_send_fragments_to_serial() {
        let mut config = test_config();
        config.set_sik_packet_size(20);
        let (engine, mut reader, stats) = start_serial(config);

        let first = full_packet(1, 16);
        let second = full_packet(2, 60);
        engine.send_sik_packet(0, &first).unwrap();
        engine.send_sik_packet(0, &second).unwrap();

        let got = collect_packets(&mut reader, 2);
        assert_eq!(got, vec![first, second]);

        // 40 bytes → 3 조각, 84 bytes → 6 조각 (16 bytes씩)
        assert!(wait_for(|| stats.snapshot().interfaces[0].tx_packets == 9));
    }

    #[test]
    fn test_send_rejects_bad_requests() {
        let (w, _r, _c) = loopback(InterfaceKind::WifiMonitor);
        let infos = vec![
            InterfaceInfo::new("wlan0", InterfaceKind::WifiMonitor),
            InterfaceInfo::new("sik0", InterfaceKind::SikSerial),
        ];
        let stats = Arc::new(RadioStats::new(&infos));
        let mut engine = TxEngine::start(
            test_config(),
            vec![
                TxInterface::new(infos[0].clone(), w),
                TxInterface::receive_only(infos[1].clone()),
            ],
            stats,
        )
        .unwrap();

        assert_eq!(
            engine.send_sik_packet(0, &[1, 2, 3]),
            Err(TxError::InvalidInterface { index: 0 })
        );
        assert_eq!(
            engine.send_sik_packet(9, &[1, 2, 3]),
            Err(TxError::InvalidInterface { index: 9 })
        );
        assert_eq!(
            engine.send_sik_packet(1, &[]),
            Err(TxError::InvalidPacket { len: 0 })
        );
        let huge = vec![0u8; MAX_PACKET_TOTAL_SIZE + 1];
        assert!(matches!(
            engine.send_sik_packet(1, &huge),
            Err(TxError::InvalidPacket { .. })
        ));

        engine.stop();
        assert_eq!(engine.send_sik_packet(1, &[1]), Err(TxError::Stopped));
    }

    /// 게이트가 열릴 때까지 쓰기를 막는 장치
    struct GatedWriter {
        gate: Receiver<()>,
    }

    impl RadioWriter for GatedWriter {
        fn write(&mut self, frame: &[u8]) -> io::Result<usize> {
            let _ = self.gate.recv();
            Ok(frame.len())
        }
    }

    #[test]
    fn test_queue_full_after_retries() {
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let info = InterfaceInfo::new("sik0", InterfaceKind::SikSerial);
        let stats = Arc::new(RadioStats::new(std::slice::from_ref(&info)));
        let config = Config {
            tx_queue_capacity: 1,
            ..test_config()
        };
        let engine = TxEngine::start(
            config,
            vec![TxInterface::new(info, GatedWriter { gate: gate_rx })],
            stats,
        )
        .unwrap();

        let packet = full_packet(1, 8);
        engine.send_sik_packet(0, &packet).unwrap();
        assert!(wait_for(|| engine.pending_messages() == 0));

        // 워커는 첫 패킷 쓰기에서 막혀 있음
        engine.send_sik_packet(0, &packet).unwrap();
        assert_eq!(engine.send_sik_packet(0, &packet), Err(TxError::QueueFull));

        drop(gate_tx);
    }

    #[test]
    fn test_paused_interface_drops_packets() {
        let (engine, mut reader, _stats) = start_serial(test_config());
        engine.pause_interface(0).unwrap();
        assert!(engine.is_interface_paused(0));

        engine.send_sik_packet(0, &full_packet(1, 8)).unwrap();
        assert!(wait_for(|| engine.pending_messages() == 0));
        thread::sleep(Duration::from_millis(20));
        assert!(!reader.poll_readable().unwrap());

        engine.resume_interface(0).unwrap();
        assert!(!engine.is_interface_paused(0));
        let packet = full_packet(2, 8);
        engine.send_sik_packet(0, &packet).unwrap();
        assert_eq!(collect_packets(&mut reader, 1), vec![packet]);
    }

    #[test]
    fn test_set_sik_packet_size_clamps() {
        let (engine, _reader, _stats) = start_serial(test_config());
        assert_eq!(engine.sik_packet_size(0), Some(crate::DEFAULT_SIK_PACKET_SIZE));
        assert_eq!(engine.set_sik_packet_size(0, 64).unwrap(), 64);
        assert_eq!(
            engine.set_sik_packet_size(0, 5).unwrap(),
            crate::DEFAULT_SIK_PACKET_SIZE
        );
        assert!(engine.set_sik_packet_size(3, 64).is_err());
    }

    #[test]
    fn test_sender_clones_share_queue() {
        let (engine, mut reader, _stats) = start_serial(test_config());
        let packets: Vec<Bytes> = (0..4).map(|i| full_packet(i, 10)).collect();

        let handles: Vec<_> = packets
            .iter()
            .cloned()
            .map(|p| {
                let sender = engine.sender();
                thread::spawn(move || sender.send_sik_packet(0, &p))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }

        let mut got = collect_packets(&mut reader, 4);
        got.sort();
        let mut want = packets;
        want.sort();
        assert_eq!(got, want);
    }
}
