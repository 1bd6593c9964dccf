//! 라디오 인터페이스
//!
//! - `InterfaceKind`: WiFi 모니터 모드 / SiK 시리얼
//! - `RadioReader` / `RadioWriter`: Rx/Tx 엔진이 사용하는 장치 경계
//! - `SerialRadio`: SiK 텔레메트리 라디오 (serialport)
//! - `UdpRadio`: 외부 인젝터와 UDP로 연결된 WiFi 라디오
//! - `loopback`: 메모리 내 라디오 쌍 (테스트/시뮬레이션)

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use serialport::SerialPort;
use tracing::{debug, info};

use crate::{Result, MAX_PACKET_TOTAL_SIZE};

/// 인터페이스 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum InterfaceKind {
    /// 모니터 모드 WiFi (프레임 단위 수신)
    WifiMonitor,
    /// SiK 시리얼 텔레메트리 라디오 (바이트 스트림)
    SikSerial,
}

impl InterfaceKind {
    pub fn is_serial(&self) -> bool {
        matches!(self, InterfaceKind::SikSerial)
    }
}

/// 인터페이스 정보
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    /// 장치 이름 (예: /dev/ttyUSB0, wlan1)
    pub name: String,

    pub kind: InterfaceKind,

    /// 소속 라디오 링크 (없으면 통계에서 링크 집계 제외)
    pub radio_link: Option<usize>,
}

impl InterfaceInfo {
    pub fn new(name: impl Into<String>, kind: InterfaceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            radio_link: None,
        }
    }

    pub fn with_link(mut self, radio_link: usize) -> Self {
        self.radio_link = Some(radio_link);
        self
    }
}

/// 수신측 장치
pub trait RadioReader: Send {
    /// 예외 상태 (장치 분리 등)
    fn poll_exception(&mut self) -> bool {
        false
    }

    /// 읽을 데이터가 있는지 (블록하지 않음)
    fn poll_readable(&mut self) -> io::Result<bool>;

    /// WiFi: 프레임 하나, 시리얼: 가용 바이트
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// 마지막 수신 신호 세기 (dBm)
    fn signal_dbm(&self) -> Option<i32> {
        None
    }
}

/// 송신측 장치
pub trait RadioWriter: Send {
    fn write(&mut self, frame: &[u8]) -> io::Result<usize>;
}

/// Rx 엔진에 넘기는 인터페이스
pub struct RxInterface {
    pub info: InterfaceInfo,
    pub reader: Box<dyn RadioReader>,
}

impl RxInterface {
    pub fn new(info: InterfaceInfo, reader: impl RadioReader + 'static) -> Self {
        Self {
            info,
            reader: Box::new(reader),
        }
    }
}

/// Tx 엔진에 넘기는 인터페이스 (쓰기 불가 인터페이스는 `writer` 없음)
pub struct TxInterface {
    pub info: InterfaceInfo,
    pub writer: Option<Box<dyn RadioWriter>>,
}

impl TxInterface {
    pub fn new(info: InterfaceInfo, writer: impl RadioWriter + 'static) -> Self {
        Self {
            info,
            writer: Some(Box::new(writer)),
        }
    }

    /// 수신 전용 인터페이스
    pub fn receive_only(info: InterfaceInfo) -> Self {
        Self { info, writer: None }
    }
}

/// SiK 시리얼 라디오
pub struct SerialRadio;

impl SerialRadio {
    /// 포트 열기 (8N1)
    pub fn open(path: &str, baud_rate: u32) -> Result<(SerialRadioReader, SerialRadioWriter)> {
        let mut builder = serialport::new(path, baud_rate).timeout(Duration::from_millis(10));
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let port = builder.open()?;
        let writer = port.try_clone()?;

        info!("SiK 라디오 열림: {} @ {} baud", path, baud_rate);
        Ok((
            SerialRadioReader { port },
            SerialRadioWriter { port: writer },
        ))
    }
}

pub struct SerialRadioReader {
    port: Box<dyn SerialPort>,
}

impl RadioReader for SerialRadioReader {
    fn poll_readable(&mut self) -> io::Result<bool> {
        Ok(self.port.bytes_to_read()? > 0)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

pub struct SerialRadioWriter {
    port: Box<dyn SerialPort>,
}

impl RadioWriter for SerialRadioWriter {
    fn write(&mut self, frame: &[u8]) -> io::Result<usize> {
        self.port.write(frame)
    }
}

/// 외부 패킷 인젝터/캡처 프로세스와 UDP로 연결된 WiFi 라디오
pub struct UdpRadio;

impl UdpRadio {
    pub fn bind(local: SocketAddr, remote: SocketAddr) -> Result<(UdpRadioReader, UdpRadioWriter)> {
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        let writer = socket.try_clone()?;

        info!("UDP 라디오 브리지: {} <-> {}", local, remote);
        Ok((
            UdpRadioReader {
                socket,
                pending: None,
                buf: vec![0u8; MAX_PACKET_TOTAL_SIZE * 4],
            },
            UdpRadioWriter {
                socket: writer,
                remote,
            },
        ))
    }
}

pub struct UdpRadioReader {
    socket: UdpSocket,
    pending: Option<Bytes>,
    buf: Vec<u8>,
}

impl RadioReader for UdpRadioReader {
    fn poll_readable(&mut self) -> io::Result<bool> {
        if self.pending.is_some() {
            return Ok(true);
        }
        match self.socket.recv(&mut self.buf) {
            Ok(len) => {
                self.pending = Some(Bytes::copy_from_slice(&self.buf[..len]));
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let frame = match self.pending.take() {
            Some(frame) => frame,
            None => {
                let len = self.socket.recv(&mut self.buf)?;
                Bytes::copy_from_slice(&self.buf[..len])
            }
        };
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Ok(len)
    }
}

pub struct UdpRadioWriter {
    socket: UdpSocket,
    remote: SocketAddr,
}

impl RadioWriter for UdpRadioWriter {
    fn write(&mut self, frame: &[u8]) -> io::Result<usize> {
        self.socket.send_to(frame, self.remote)
    }
}

/// 메모리 내 라디오 상태
#[derive(Debug, Default)]
struct LoopbackState {
    frames: VecDeque<Bytes>,
    stream: VecDeque<u8>,
    loss: f64,
    exception: bool,
    fail_reads: bool,
    signal_dbm: Option<i32>,
}

/// 메모리 내 라디오 쌍 생성
///
/// SiK 종류는 바이트 스트림, WiFi 종류는 프레임 단위로 전달된다.
pub fn loopback(kind: InterfaceKind) -> (LoopbackWriter, LoopbackReader, LoopbackControl) {
    let state = Arc::new(Mutex::new(LoopbackState::default()));
    (
        LoopbackWriter {
            kind,
            state: state.clone(),
        },
        LoopbackReader {
            kind,
            state: state.clone(),
        },
        LoopbackControl { kind, state },
    )
}

fn deliver(kind: InterfaceKind, state: &mut LoopbackState, data: &[u8]) {
    match kind {
        InterfaceKind::SikSerial => state.stream.extend(data.iter().copied()),
        InterfaceKind::WifiMonitor => state.frames.push_back(Bytes::copy_from_slice(data)),
    }
}

pub struct LoopbackWriter {
    kind: InterfaceKind,
    state: Arc<Mutex<LoopbackState>>,
}

impl RadioWriter for LoopbackWriter {
    fn write(&mut self, frame: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.loss > 0.0 && rand::thread_rng().gen_bool(state.loss.min(1.0)) {
            debug!("loopback: {} bytes 손실 주입", frame.len());
            return Ok(frame.len());
        }
        deliver(self.kind, &mut state, frame);
        Ok(frame.len())
    }
}

pub struct LoopbackReader {
    kind: InterfaceKind,
    state: Arc<Mutex<LoopbackState>>,
}

impl RadioReader for LoopbackReader {
    fn poll_exception(&mut self) -> bool {
        self.state.lock().exception
    }

    fn poll_readable(&mut self) -> io::Result<bool> {
        let state = self.state.lock();
        Ok(state.fail_reads || !state.frames.is_empty() || !state.stream.is_empty())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::Other, "loopback read failure"));
        }
        match self.kind {
            InterfaceKind::SikSerial => {
                let len = state.stream.len().min(buf.len());
                for (dst, src) in buf.iter_mut().zip(state.stream.drain(..len)) {
                    *dst = src;
                }
                Ok(len)
            }
            InterfaceKind::WifiMonitor => match state.frames.pop_front() {
                Some(frame) => {
                    let len = frame.len().min(buf.len());
                    buf[..len].copy_from_slice(&frame[..len]);
                    Ok(len)
                }
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "no frame")),
            },
        }
    }

    fn signal_dbm(&self) -> Option<i32> {
        self.state.lock().signal_dbm
    }
}

/// 테스트/시뮬레이션용 제어 핸들
#[derive(Clone)]
pub struct LoopbackControl {
    kind: InterfaceKind,
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackControl {
    /// 송신기를 거치지 않고 수신측에 직접 주입
    pub fn inject(&self, data: &[u8]) {
        deliver(self.kind, &mut self.state.lock(), data);
    }

    /// 쓰기 손실 확률 (0.0 ~ 1.0)
    pub fn set_loss(&self, probability: f64) {
        self.state.lock().loss = probability.clamp(0.0, 1.0);
    }

    pub fn raise_exception(&self) {
        self.state.lock().exception = true;
    }

    /// 이후 모든 읽기를 실패시킴
    pub fn fail_reads(&self) {
        self.state.lock().fail_reads = true;
    }

    /// 장치 복구
    pub fn recover(&self) {
        let mut state = self.state.lock();
        state.exception = false;
        state.fail_reads = false;
    }

    pub fn set_signal_dbm(&self, dbm: i32) {
        self.state.lock().signal_dbm = Some(dbm);
    }

    /// 아직 읽히지 않은 바이트 수
    pub fn pending_bytes(&self) -> usize {
        let state = self.state.lock();
        state.stream.len() + state.frames.iter().map(|f| f.len()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_loopback_is_byte_stream() {
        let (mut tx, mut rx, _ctl) = loopback(InterfaceKind::SikSerial);
        tx.write(&[1, 2, 3]).unwrap();
        tx.write(&[4, 5]).unwrap();

        assert!(rx.poll_readable().unwrap());
        let mut buf = [0u8; 4];
        assert_eq!(rx.read(&mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(rx.read(&mut buf).unwrap(), 1);
        assert!(!rx.poll_readable().unwrap());
    }

    #[test]
    fn test_wifi_loopback_keeps_frames() {
        let (mut tx, mut rx, ctl) = loopback(InterfaceKind::WifiMonitor);
        tx.write(&[1, 2, 3]).unwrap();
        ctl.inject(&[9, 9]);

        let mut buf = [0u8; 16];
        assert_eq!(rx.read(&mut buf).unwrap(), 3);
        assert_eq!(rx.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[9, 9]);
        assert_eq!(
            rx.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::TimedOut
        );
    }

    #[test]
    fn test_loopback_faults() {
        let (mut tx, mut rx, ctl) = loopback(InterfaceKind::SikSerial);
        ctl.set_loss(1.0);
        assert_eq!(tx.write(&[1, 2, 3]).unwrap(), 3);
        assert_eq!(ctl.pending_bytes(), 0);

        ctl.raise_exception();
        assert!(rx.poll_exception());
        ctl.fail_reads();
        assert!(rx.read(&mut [0u8; 4]).is_err());
        ctl.recover();
        assert!(!rx.poll_exception());
    }

    #[test]
    fn test_udp_radio_pair() {
        let a_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let probe = UdpSocket::bind(a_addr).unwrap();
        let b_addr = probe.local_addr().unwrap();
        drop(probe);

        let (mut a_rx, _a_tx) = UdpRadio::bind("127.0.0.1:0".parse().unwrap(), b_addr).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let a_local = a_rx.socket.local_addr().unwrap();
        sender.send_to(&[7, 7, 7], a_local).unwrap();

        let mut ready = false;
        for _ in 0..100 {
            if a_rx.poll_readable().unwrap() {
                ready = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(ready);
        let mut buf = [0u8; 8];
        assert_eq!(a_rx.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[7, 7, 7]);
    }
}
