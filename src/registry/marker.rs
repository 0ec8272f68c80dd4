//! 포트 마커 - `{data_dir}/ports/{pid}.port` 파일에 바인딩한 컨트롤 포트를 기록
//!
//! 각 파일은 소유 프로세스만 쓰고 지웁니다. 다른 프로세스는 읽기만 하며,
//! 주인이 죽은 마커는 정리 대상입니다.

use std::path::PathBuf;

const MARKER_EXT: &str = "port";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMarker {
    pub pid: u32,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct MarkerStore {
    dir: PathBuf,
}

impl MarkerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, pid: u32) -> PathBuf {
        self.dir.join(format!("{}.{}", pid, MARKER_EXT))
    }

    /// 임시 파일에 쓰고 rename으로 교체
    pub fn write(&self, pid: u32, port: u16) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!("{}.{}.tmp", pid, MARKER_EXT));
        std::fs::write(&tmp, port.to_string())?;
        std::fs::rename(&tmp, self.path_for(pid))?;
        tracing::debug!("[Discovery] Port marker written: pid={} port={}", pid, port);
        Ok(())
    }

    pub fn remove(&self, pid: u32) -> std::io::Result<()> {
        match std::fs::remove_file(self.path_for(pid)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn read(&self, pid: u32) -> Option<u16> {
        std::fs::read_to_string(self.path_for(pid))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// 읽을 수 있는 마커 전부. 형식이 깨진 파일은 건너뜀
    pub fn list(&self) -> Vec<PortMarker> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut markers: Vec<PortMarker> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(MARKER_EXT) {
                    return None;
                }
                let pid: u32 = path.file_stem()?.to_str()?.parse().ok()?;
                let port: u16 = std::fs::read_to_string(&path).ok()?.trim().parse().ok()?;
                Some(PortMarker { pid, port })
            })
            .collect();
        markers.sort_by_key(|m| m.pid);
        markers
    }

    /// 살아 있지 않은 PID의 마커 삭제. 삭제한 수 반환
    pub async fn prune_stale(&self) -> usize {
        let markers = self.list();
        if markers.is_empty() {
            return 0;
        }
        let alive = crate::process_monitor::filter_running(markers.iter().map(|m| m.pid).collect()).await;

        let mut removed = 0;
        for marker in markers.iter().filter(|m| !alive.contains(&m.pid)) {
            match self.remove(marker.pid) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("[Discovery] Failed to remove stale marker {}: {}", marker.pid, e),
            }
        }
        if removed > 0 {
            tracing::info!("[Discovery] Pruned {} stale port marker(s)", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = MarkerStore::new(dir.path().join("ports"));

        store.write(4242, 8085).unwrap();
        assert_eq!(store.read(4242), Some(8085));
        assert_eq!(store.list(), vec![PortMarker { pid: 4242, port: 8085 }]);

        store.remove(4242).unwrap();
        assert_eq!(store.read(4242), None);
        // 이미 없는 마커 삭제는 성공
        store.remove(4242).unwrap();
    }

    #[test]
    fn list_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = MarkerStore::new(dir.path());
        store.write(10, 8081).unwrap();
        std::fs::write(dir.path().join("abc.port"), "8082").unwrap();
        std::fs::write(dir.path().join("11.port"), "not-a-port").unwrap();
        std::fs::write(dir.path().join("12.txt"), "8083").unwrap();

        assert_eq!(store.list(), vec![PortMarker { pid: 10, port: 8081 }]);
    }

    #[test]
    fn missing_dir_lists_nothing() {
        let store = MarkerStore::new("/definitely/not/here/ports");
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn prune_keeps_live_owner() {
        let dir = tempfile::tempdir().unwrap();
        let store = MarkerStore::new(dir.path());
        let me = std::process::id();
        store.write(me, 8081).unwrap();
        store.write(u32::MAX - 7, 8082).unwrap();

        assert_eq!(store.prune_stale().await, 1);
        assert_eq!(store.list(), vec![PortMarker { pid: me, port: 8081 }]);
    }
}
