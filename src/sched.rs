//! 워커 스레드 스케줄링 우선순위
//!
//! 플랫폼별 시작 단계. 각 워커 스레드가 시작 직후 한 번 호출한다.

use tracing::{debug, warn};

/// 현재 스레드를 실시간(FIFO) 우선순위로 올린다
///
/// 권한이 없거나 지원하지 않는 플랫폼이면 경고만 남기고 false.
#[cfg(target_os = "linux")]
pub fn raise_current_thread_priority(name: &str, priority: i32) -> bool {
    // SAFETY: sched_param은 POD이고, pthread_self()는 항상 유효한 현재 스레드 핸들
    let result = unsafe {
        let min = libc::sched_get_priority_min(libc::SCHED_FIFO);
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        let param = libc::sched_param {
            sched_priority: priority.clamp(min, max),
        };
        libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param)
    };

    if result == 0 {
        debug!("{} 스레드 우선순위 SCHED_FIFO {}", name, priority);
        true
    } else {
        warn!(
            "{} 스레드 우선순위 설정 실패 (errno {}), 기본 스케줄링 유지",
            name, result
        );
        false
    }
}

#[cfg(not(target_os = "linux"))]
pub fn raise_current_thread_priority(name: &str, priority: i32) -> bool {
    warn!(
        "{} 스레드 우선순위 {} 설정은 이 플랫폼에서 지원하지 않음",
        name, priority
    );
    false
}
