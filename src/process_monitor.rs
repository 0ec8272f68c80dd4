use std::time::Duration;
use sysinfo::{Pid, System};

/// 특정 PID가 실행 중인지 확인 (크로스 플랫폼)
pub fn is_running(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.process(Pid::from_u32(pid)).is_some()
}

// sysinfo 시스템 콜은 OS 프로세스 테이블 전체를 동기적으로 스캔하므로
// tokio 워커 스레드 대신 spawn_blocking 풀에서 실행합니다.

/// `is_running`의 비동기 래퍼.
pub async fn is_running_async(pid: u32) -> bool {
    tokio::task::spawn_blocking(move || is_running(pid))
        .await
        .unwrap_or(false)
}

/// 여러 PID 중 살아 있는 것만 (프로세스 테이블 한 번만 스캔)
pub async fn filter_running(pids: Vec<u32>) -> Vec<u32> {
    tokio::task::spawn_blocking(move || {
        let mut sys = System::new();
        sys.refresh_processes();
        pids.into_iter()
            .filter(|pid| sys.process(Pid::from_u32(*pid)).is_some())
            .collect()
    })
    .await
    .unwrap_or_default()
}

/// PID 강제 종료
pub fn kill_pid(pid: u32) -> anyhow::Result<()> {
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        std::process::Command::new("taskkill")
            .args(["/F", "/PID", &pid.to_string()])
            .creation_flags(CREATE_NO_WINDOW)
            .output()
            .map_err(|e| anyhow::anyhow!("Failed to kill PID {}: {}", pid, e))?;
    }
    #[cfg(not(target_os = "windows"))]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid as NixPid;

        signal::kill(NixPid::from_raw(pid as i32), Signal::SIGKILL)
            .map_err(|e| anyhow::anyhow!("Failed to kill PID {}: {}", pid, e))?;
    }
    Ok(())
}

/// PID가 사라질 때까지 폴링. 제한 시간 안에 종료되면 true
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !is_running_async(pid).await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
