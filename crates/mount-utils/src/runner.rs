use crate::{MountError, MountPoint, Result};
use futures::channel::oneshot::{channel as oneshot, Receiver, Sender};
use once_cell::sync::OnceCell;
use smallvec::SmallVec;
use std::{
  fs,
  future::Future,
  panic::{catch_unwind, RefUnwindSafe, UnwindSafe},
  path::PathBuf,
  sync::Arc,
};
use tracing::{error, Span};

struct MounterMessage {
  span: Span,
  run: Box<dyn FnOnce(Span) + Send + UnwindSafe + RefUnwindSafe>,
}

impl MounterMessage {
  fn new(span: Span, f: impl FnOnce(Span) + Send + UnwindSafe + RefUnwindSafe + 'static) -> Self {
    Self {
      span,
      run: Box::new(f),
    }
  }
}

// Span is not UnwindSafe because of its dyn subscriber, but a span is never
// observed in a broken state after a panic.
impl UnwindSafe for MounterMessage {}

type MounterDispatcher = crossbeam::channel::Sender<MounterMessage>;

/// Blocking mount operations. Implementations run on the dispatcher thread
/// one call at a time.
pub trait MounterImpl: Sized + Send + Sync + UnwindSafe + RefUnwindSafe + 'static {
  /// Mounts source to target as fstype with given options. An option named
  /// `bind` turns this into a bind mount.
  fn mount(
    &self,
    source: String,
    target: PathBuf,
    fstype: String,
    options: SmallVec<[String; 4]>,
  ) -> Result<()>;

  /// Unmounts given target. Targets that are not mounted are left alone.
  fn unmount(&self, target: PathBuf) -> Result<()>;

  /// List returns a list of all mounted filesystems.
  fn list(&self) -> Result<Vec<MountPoint>>;

  fn bind_mount(
    &self,
    source: PathBuf,
    target: PathBuf,
    options: SmallVec<[String; 4]>,
  ) -> Result<()> {
    let mut options = options;
    if !options.iter().any(|o| o == "bind") {
      options.insert(0, "bind".to_owned());
    }

    self.mount(
      source.to_string_lossy().into_owned(),
      target,
      String::new(),
      options,
    )
  }

  fn is_mount_point(&self, target: PathBuf) -> Result<bool> {
    // Resolve any symlinks in target, the kernel does the same and uses the
    // resolved path in /proc/mounts.
    let target = fs::canonicalize(&target).unwrap_or(target);

    Ok(self.list()?.iter().any(|mp| mp.matches(&target)))
  }
}

static DISPATCHER: OnceCell<MounterDispatcher> = OnceCell::new();

fn dispatcher() -> Result<&'static MounterDispatcher> {
  DISPATCHER
    .get_or_try_init(|| {
      let (sender, receiver) = crossbeam::channel::unbounded::<MounterMessage>();

      std::thread::Builder::new()
        .name("mount-utils:dispatch".into())
        .spawn(move || {
          while let Ok(msg) = receiver.recv() {
            if let Err(e) = catch_unwind(move || {
              let MounterMessage { span, run } = msg;
              run(span)
            }) {
              error!("Failed to run mount function in dispatcher: {:?}", e);
            }
          }
        })
        .map(|_| sender)
    })
    .map_err(|e| MountError::Dispatcher(format!("failed to spawn dispatcher: {}", e)))
}

pub(crate) fn run<R: 'static, F: 'static>(f: F) -> impl Future<Output = Result<R>>
where
  F: FnOnce() -> Result<R> + Send + UnwindSafe + RefUnwindSafe,
  R: UnwindSafe + RefUnwindSafe + Send,
{
  struct OuterMsg<R, F>
  where
    F: FnOnce() -> Result<R> + Send + UnwindSafe + RefUnwindSafe,
    R: UnwindSafe + RefUnwindSafe,
  {
    run: F,
    sender: Sender<Result<R>>,
  }

  impl<R, F> UnwindSafe for OuterMsg<R, F>
  where
    F: FnOnce() -> Result<R> + Send + UnwindSafe + RefUnwindSafe,
    R: UnwindSafe + RefUnwindSafe,
  {
  }

  impl<R, F> RefUnwindSafe for OuterMsg<R, F>
  where
    F: FnOnce() -> Result<R> + Send + UnwindSafe + RefUnwindSafe,
    R: UnwindSafe + RefUnwindSafe,
  {
  }

  let span = Span::current();
  let (sender, receiver) = oneshot();

  match dispatcher() {
    Ok(dispatch) => {
      let msg = OuterMsg { run: f, sender };

      // A failed send drops the message and its sender, which surfaces as a
      // cancelled request in `read`.
      if dispatch
        .send(MounterMessage::new(span, move |span| {
          let OuterMsg { run, sender } = msg;
          let result = {
            let _enter = span.enter();
            run()
          };

          let _ = sender.send(result);
        }))
        .is_err()
      {
        error!("mount dispatcher thread is gone");
      }
    }
    Err(e) => {
      let _ = sender.send(Err(e));
    }
  };

  read(receiver)
}

pub(crate) fn run_inst<T: MounterImpl, R: 'static, F: 'static>(
  mounter: Arc<T>,
  f: F,
) -> impl Future<Output = Result<R>>
where
  F: FnOnce(&T) -> Result<R> + Send + UnwindSafe + RefUnwindSafe,
  R: UnwindSafe + RefUnwindSafe + Send,
{
  run(move || f(&*mounter))
}

async fn read<R>(receiver: Receiver<Result<R>>) -> Result<R> {
  match receiver.await {
    Ok(r) => r,
    Err(_) => Err(MountError::Dispatcher(
      "request was cancelled (thread panicked?)".into(),
    )),
  }
}

/// Splits mount options for a bind mount. Returns whether `bind` was
/// requested, the options for the initial bind, and the options for the
/// remount that applies the rest (bind mounts ignore them otherwise).
pub(crate) fn make_bind_opts(opts: &[String]) -> (bool, Vec<String>, Vec<String>) {
  let mut bind_remount_opts = vec!["bind".to_owned(), "remount".to_owned()];
  let mut bind = false;
  let mut bind_opts = vec!["bind".to_owned()];

  for opt in opts {
    match opt.as_str() {
      "bind" => {
        bind = true;
      }
      "_netdev" => {
        // userspace option, not carried over to the bind mount by the kernel
        bind_opts.push("_netdev".to_owned());
        bind_remount_opts.push("_netdev".to_owned());
      }
      _ => bind_remount_opts.push(opt.clone()),
    }
  }

  (bind, bind_opts, bind_remount_opts)
}

pub trait MounterWrapper {
  type Mounter: MounterImpl;

  fn mounter(&self) -> &Arc<Self::Mounter>;
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  #[test_case(&["vers=2", "ro", "_netdev"], false, &[], &[] ; "plain mount")]
  #[test_case(&["bind", "vers=2", "ro", "_netdev"], true, &["bind", "_netdev"], &["bind", "remount", "vers=2", "ro", "_netdev"] ; "bind with netdev")]
  #[test_case(&["bind"], true, &["bind"], &["bind", "remount"] ; "bare bind")]
  fn bind_opts_split(
    mount_option: &[&'static str],
    is_bind: bool,
    expected_bind_opts: &[&'static str],
    expected_remount_opts: &[&'static str],
  ) {
    let options = mount_option
      .iter()
      .map(|s| (*s).to_owned())
      .collect::<Vec<_>>();

    let (bind, bind_opts, bind_remount_opts) = crate::runner::make_bind_opts(&options);

    assert_eq!(bind, is_bind);
    if is_bind {
      assert_eq!(bind_opts, expected_bind_opts);
      assert_eq!(bind_remount_opts, expected_remount_opts);
    }
  }

  #[tokio::test]
  async fn run_returns_the_closure_result() {
    let value = run(|| Ok(42)).await.unwrap();
    assert_eq!(value, 42);
  }

  #[tokio::test]
  async fn panics_surface_as_dispatcher_errors() {
    let result = run::<(), _>(|| panic!("boom")).await;
    assert!(matches!(result, Err(MountError::Dispatcher(_))));

    // the dispatcher survives the panic
    assert_eq!(run(|| Ok("still alive")).await.unwrap(), "still alive");
  }
}
