//! Shared utility functions for the saba-fleet daemon.

use std::process::{Command, Stdio};

/// 재시작된 프로세스가 이전 프로세스 종료를 기다리도록 전달하는 환경 변수
pub const WAIT_PID_ENV: &str = "SABA_FLEET_WAIT_PID";

/// Apply platform-specific flags so a relaunched process outlives its parent.
/// On non-Windows platforms, this is a no-op.
#[cfg(target_os = "windows")]
pub fn apply_detach_flags(cmd: &mut Command) -> &mut Command {
    use std::os::windows::process::CommandExt;
    // DETACHED_PROCESS | CREATE_BREAKAWAY_FROM_JOB | CREATE_NEW_PROCESS_GROUP
    cmd.creation_flags(0x00000008 | 0x01000000 | 0x00000200)
}

#[cfg(not(target_os = "windows"))]
pub fn apply_detach_flags(cmd: &mut Command) -> &mut Command {
    cmd
}

/// 현재 실행 파일을 같은 인자로 다시 띄움. 새 프로세스 PID 반환
///
/// 호출 측은 직후 스스로 종료해야 합니다. 새 프로세스는 `WAIT_PID_ENV`를 보고
/// 이전 프로세스가 포트를 놓을 때까지 기다립니다.
pub fn relaunch_self() -> anyhow::Result<u32> {
    let exe = std::env::current_exe()?;
    let mut cmd = Command::new(&exe);
    cmd.args(std::env::args().skip(1))
        .env(WAIT_PID_ENV, std::process::id().to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    apply_detach_flags(&mut cmd);

    let child = cmd
        .spawn()
        .map_err(|e| anyhow::anyhow!("Failed to relaunch {}: {}", exe.display(), e))?;
    tracing::info!("[Relaunch] Spawned {} (PID {})", exe.display(), child.id());
    Ok(child.id())
}

/// `WAIT_PID_ENV`에 지정된 이전 프로세스 PID
pub fn predecessor_pid() -> Option<u32> {
    std::env::var(WAIT_PID_ENV).ok().and_then(|s| s.trim().parse().ok())
}
