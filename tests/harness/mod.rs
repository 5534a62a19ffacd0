#![allow(dead_code)]

use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;

use anyhow::{Context, Result};
use kernarg::channel::format::IPC_HANDLE_SIZE;
use kernarg::channel::{encode_frame, ExchangeRecord, IpcHandle};
use kernarg::device::ArgSignature;
use kernarg::harness::{SessionConfig, Tunables};
use tempfile::TempDir;

/// Shell stand-in for a traced binary with the tracer loaded. It follows the producer side of the
/// handoff: open the completion pipe for writing, publish the records in `$FIXTURE`, then block
/// until the release token arrives.
///
/// `$MODE` selects misbehaviour: `early` exits before touching the pipe, `partial` publishes and
/// exits without waiting, `hang` never publishes, and `signal` kills itself after the release.
const FAKE_PRODUCER: &str = r#"#!/bin/sh
if [ -n "${ENV_DUMP:-}" ]; then
    env > "$ENV_DUMP"
fi
if [ "${MODE:-}" = early ]; then
    exit "${EXIT_CODE:-3}"
fi

[ -p "$NEXUS_PIPE_NAME" ] || mkfifo -m 777 "$NEXUS_PIPE_NAME" 2>/dev/null || true
exec 3>"$NEXUS_PIPE_NAME"

if [ "${MODE:-}" = hang ]; then
    exec sleep 30
fi

cat "$FIXTURE" >> "$NEXUS_IPC_OUTPUT_FILE"
exec 3>&-

if [ "${MODE:-}" = partial ]; then
    exit "${EXIT_CODE:-4}"
fi

read -r token < "$NEXUS_PIPE_NAME"
if [ "$token" != done ]; then
    exit 97
fi

if [ "${MODE:-}" = signal ]; then
    kill -KILL $$
fi
exit "${EXIT_CODE:-0}"
"#;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub fn handle(fill: u8) -> IpcHandle {
    IpcHandle::from_bytes([fill; IPC_HANDLE_SIZE])
}

/// One scratch directory per test holding the producer script, its fixture and the channel.
pub struct Workspace {
    dir: TempDir,
    pub producer: PathBuf,
    pub fixture: PathBuf,
}

impl Workspace {
    pub fn new() -> Result<Self> {
        init_tracing();
        let dir = tempfile::tempdir().context("create temp dir")?;
        let producer = dir.path().join("fake_producer.sh");
        std::fs::write(&producer, FAKE_PRODUCER).context("write producer script")?;
        std::fs::set_permissions(&producer, std::fs::Permissions::from_mode(0o755))
            .context("chmod producer script")?;
        let fixture = dir.path().join("records.bin");
        std::fs::write(&fixture, b"").context("write empty fixture")?;
        Ok(Self {
            dir,
            producer,
            fixture,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Bytes the producer appends to the exchange file, in publication order.
    pub fn publish(&self, records: &[ExchangeRecord]) -> Result<()> {
        let bytes: Vec<u8> = records.iter().flat_map(encode_frame).collect();
        std::fs::write(&self.fixture, bytes).context("write fixture")
    }

    pub fn publish_raw(&self, bytes: &[u8]) -> Result<()> {
        std::fs::write(&self.fixture, bytes).context("write fixture")
    }

    /// Session against the fake producer with short polls and deadlines that keep a broken
    /// handoff from hanging the test run.
    pub fn session<const N: usize>(&self, signature: [&str; N]) -> SessionConfig {
        let mut config = SessionConfig::new(
            &self.producer,
            "matrixTransposeShared",
            ArgSignature::new(signature),
            "/opt/tracer/build/lib/libtracer.so",
        );
        config.channel_dir = self.path().to_path_buf();
        config.poll_interval = Duration::from_millis(10);
        config.handle_timeout = Some(Duration::from_secs(20));
        config.pipe_timeout = Some(Duration::from_secs(20));
        config
            .extra_env
            .push((OsString::from("FIXTURE"), self.fixture.clone().into_os_string()));
        config
    }
}

impl Workspace {
    /// A named build of the traced program: a wrapper that runs the fake producer with its own
    /// published records.
    pub fn variant(&self, name: &str, records: &[ExchangeRecord]) -> Result<PathBuf> {
        let fixture = self.path().join(format!("{name}.bin"));
        let bytes: Vec<u8> = records.iter().flat_map(encode_frame).collect();
        std::fs::write(&fixture, bytes).context("write variant fixture")?;

        let script = self.path().join(name);
        let body = format!(
            "#!/bin/sh\nFIXTURE='{}'\nexport FIXTURE\nexec '{}' \"$@\"\n",
            fixture.display(),
            self.producer.display()
        );
        std::fs::write(&script, body).context("write variant script")?;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .context("chmod variant script")?;
        Ok(script)
    }

    /// Tunables matching [`Workspace::session`].
    pub fn tunables(&self) -> Tunables {
        Tunables {
            channel_dir: Some(self.path().to_path_buf()),
            poll_interval: Some(Duration::from_millis(10)),
            handle_timeout: Some(Duration::from_secs(20)),
            pipe_timeout: Some(Duration::from_secs(20)),
        }
    }
}

pub fn set_env(config: &mut SessionConfig, key: &str, value: impl Into<OsString>) {
    config.extra_env.push((OsString::from(key), value.into()));
}
