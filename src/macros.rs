/// Builds an async [`Task`](crate::Task) from an optional setup block and a body block.
///
/// The setup block runs every time the task is invoked, before the body future is created;
/// clone shared handles there. The body is wrapped in `async move` and must evaluate to a
/// [`TaskResult`](crate::TaskResult).
///
/// # Usage
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
/// use triggerkeeper::task_fn;
///
/// let counter = Arc::new(AtomicUsize::new(0));
///
/// // With setup block:
/// let counting = task_fn! {
///     {
///         let counter = counter.clone();
///     }
///     {
///         counter.fetch_add(1, Ordering::SeqCst);
///         tokio::time::sleep(Duration::from_millis(10)).await;
///         Ok(())
///     }
/// };
///
/// // Without setup block:
/// let simple = task_fn! {
///     {
///         println!("tick");
///         Ok(())
///     }
/// };
/// # let _ = (counting, simple);
/// ```
#[macro_export]
macro_rules! task_fn {
  (
    { $($setup_stmts:stmt);* $(;)? }
    $main_block:block
  ) => {
    $crate::Task::from_fn(move || {
      $($setup_stmts;)*
      async move { $main_block }
    })
  };

  (
    $main_block:block
  ) => {
    $crate::Task::from_fn(move || async move { $main_block })
  };
}
