//! Per-compilation session context: configuration, scratch-path
//! allocation, and the result directory of plain selects.

use qry_common::{CompilerConfig, SessionId};

/// Mutable session state threaded through the analyzer instead of living
/// in process globals. One context serves one query at a time; `reset`
/// clears per-query state between compilations.
#[derive(Debug)]
pub struct Context {
    pub conf: CompilerConfig,
    session_id: SessionId,
    path_id: usize,
    res_dir: Option<String>,
}

impl Context {
    pub fn new(conf: CompilerConfig) -> Self {
        Context {
            conf,
            session_id: SessionId::random(),
            path_id: 0,
            res_dir: None,
        }
    }

    /// Context with a fixed session id, for deterministic tests.
    pub fn with_session_id(conf: CompilerConfig, session_id: SessionId) -> Self {
        Context {
            conf,
            session_id,
            path_id: 0,
            res_dir: None,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Allocate `<scratch dir>/<session id>.<counter>.<dest name>`. The
    /// counter is monotonic within the session, so paths never collide.
    pub fn make_scratch_path(&mut self, dest: &str) -> String {
        let path = format!(
            "{}/{}.{}.{}",
            self.conf.scratch_dir, self.session_id, self.path_id, dest
        );
        self.path_id += 1;
        path
    }

    /// Record the directory a plain select's results land in.
    pub fn set_res_dir(&mut self, dir: String) {
        self.res_dir = Some(dir);
    }

    pub fn res_dir(&self) -> Option<&str> {
        self.res_dir.as_deref()
    }

    /// Clear per-query state; the session id and path counter survive so
    /// later queries keep allocating unique paths.
    pub fn reset(&mut self) {
        self.res_dir = None;
    }
}

#[cfg(test)]
mod tests {
    use qry_common::{CompilerConfig, SessionId};

    use super::Context;

    #[test]
    fn scratch_paths_are_unique_and_named() {
        let mut ctx = Context::with_session_id(
            CompilerConfig {
                scratch_dir: "/tmp/qry".to_string(),
                ..CompilerConfig::default()
            },
            SessionId(7),
        );
        let a = ctx.make_scratch_path("insclause-0");
        let b = ctx.make_scratch_path("insclause-0");
        assert_eq!(a, "/tmp/qry/7.0.insclause-0");
        assert_eq!(b, "/tmp/qry/7.1.insclause-0");
    }
}
