//! Mostly-read, writer-preferring reader-writer lock with one designated
//! writer thread.
//!
//! Readers pay one store and one load on the fast path: a reader raises its
//! own `read_requested` flag, then re-checks `write_requested` and backs off
//! if a write is pending. The writer raises `write_requested`, then scans
//! every registered reader until none holds read access. Both sides use
//! sequentially consistent ordering, so at least one of them always sees
//! the other's flag.
//!
//! Write access is two-phase: `write_intent_lock` claims the writer identity
//! without excluding readers, `write_lock` excludes them. Misuse (write-side
//! calls from a non-writer thread, read-side calls from the writer thread,
//! unbalanced lock/unlock) panics.
use crate::backoff::{Backoff, Step};
use crate::cancellation::{CancellationBridge, NeverCancelled};
use crate::config::LockConfig;
use crate::constants::NO_THREAD;
use crate::errors::Error;
use crate::helpers::{current_thread_token, duration_nanos};
use crate::reader::{ImpatientScope, ReaderRecord};
use crate::reader_registry::ReaderRegistry;
use crate::telemetry::{
    DEAD_READERS_COLLECTED_TOTAL, READS_CANCELLED_TOTAL, WRITER_PARKS_TOTAL, WRITE_LOCKS_TOTAL,
};
use crate::types::{ReaderId, ThreadToken};
use crossbeam_queue::SegQueue;
use log::{debug, info, trace};
use metrics::counter;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, Thread};
use std::time::Instant;

/// Callback run by a suspended writer before it re-acquires the write lock.
pub type PreWriteHook = Arc<dyn Fn() + Send + Sync>;

// `last_gc_nanos` value before the first GC pass
const GC_NEVER: u64 = u64::MAX;

pub struct ReadMostlyLock {
    config: LockConfig,
    /// Token of the thread holding write intent, `NO_THREAD` if none.
    writer_thread: AtomicU64,
    /// Parking handle of the writer, for readers draining out of `end_read`.
    writer_handle: Mutex<Option<Thread>>,
    write_intent: AtomicBool,
    intent_waiters: SegQueue<Thread>,
    write_requested: AtomicBool,
    write_acquired: AtomicBool,
    write_suspended: AtomicBool,
    readers: ReaderRegistry,
    bridge: Arc<dyn CancellationBridge>,
    pre_write_hooks: Mutex<Vec<PreWriteHook>>,
    created: Instant,
    last_gc_nanos: AtomicU64,
}

impl Default for ReadMostlyLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadMostlyLock {
    /// Lock with default tuning and no host cancellation.
    pub fn new() -> Self {
        Self::build(LockConfig::default(), Arc::new(NeverCancelled))
    }

    pub fn with_config(
        config: LockConfig,
        bridge: Arc<dyn CancellationBridge>,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self::build(config, bridge))
    }

    fn build(config: LockConfig, bridge: Arc<dyn CancellationBridge>) -> Self {
        crate::ensure_logging();
        crate::telemetry::init();
        debug!("read-mostly lock created with {:?}", config);
        Self {
            config,
            writer_thread: AtomicU64::new(NO_THREAD),
            writer_handle: Mutex::new(None),
            write_intent: AtomicBool::new(false),
            intent_waiters: SegQueue::new(),
            write_requested: AtomicBool::new(false),
            write_acquired: AtomicBool::new(false),
            write_suspended: AtomicBool::new(false),
            readers: ReaderRegistry::new(),
            bridge,
            pre_write_hooks: Mutex::new(Vec::new()),
            created: Instant::now(),
            last_gc_nanos: AtomicU64::new(GC_NEVER),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    // ---- registration -----------------------------------------------------

    /// Register the calling thread as a reader.
    ///
    /// The handle is bound to this thread. A thread that still has a live
    /// handle gets another handle to the same record, so read access taken
    /// through one is seen by all of them. Dropping the last handle without
    /// calling [`ReaderHandle::deregister`] leaves the record to the
    /// dead-reader GC, exactly as if the thread had died.
    pub fn register_reader(&self) -> ReaderHandle<'_> {
        let owner = current_thread_token();
        // Only the owner registers records for its token, so lookup and insert cannot race.
        let (id, record) = match self.readers.find_by_owner(owner) {
            Some(existing) => existing,
            None => {
                let record = Arc::new(ReaderRecord::for_current_thread());
                let id = self.readers.register(&record);
                trace!("registered reader {} for {}", id, owner);
                (id, record)
            }
        };
        ReaderHandle {
            lock: self,
            record,
            id,
            _not_send: PhantomData,
        }
    }

    /// Number of reader records currently registered, dead ones included.
    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    pub fn is_reader_registered(&self, id: ReaderId) -> bool {
        self.readers.contains(id)
    }

    // ---- read side --------------------------------------------------------

    fn check_read_thread_access(&self, record: &ReaderRecord) {
        debug_assert_eq!(record.owner(), current_thread_token());
        assert!(
            self.writer_thread.load(Ordering::SeqCst) != record.owner().as_u64(),
            "read access requested from the writer thread ({})",
            record.owner()
        );
    }

    /// Optimistically raise `read_requested`, then back out if a write is pending.
    #[inline]
    fn try_acquire_read(&self, record: &ReaderRecord) -> bool {
        record.set_read_requested(true);
        if self.write_requested.load(Ordering::SeqCst) {
            record.set_read_requested(false);
            false
        } else {
            true
        }
    }

    fn throw_if_impatient(&self, record: &ReaderRecord) -> Result<(), Error> {
        if record.is_impatient()
            && self.write_requested.load(Ordering::SeqCst)
            && self.config.cancel_on_contention
            && !self.bridge.is_in_non_cancelable_section()
        {
            counter!(READS_CANCELLED_TOTAL).increment(1);
            trace!("impatient reader {} gives up: write pending", record.owner());
            return Err(Error::CannotRunReadAction);
        }
        Ok(())
    }

    fn throw_if_cancelled(&self) -> Result<(), Error> {
        if self.bridge.is_current_operation_cancelled() && !self.bridge.is_in_non_cancelable_section() {
            counter!(READS_CANCELLED_TOTAL).increment(1);
            return Err(Error::OperationCancelled);
        }
        Ok(())
    }

    fn start_read<'a>(&'a self, record: &'a ReaderRecord) -> Result<ReadGuard<'a>, Error> {
        self.check_read_thread_access(record);
        self.throw_if_impatient(record)?;
        if record.is_read_requested() {
            return Ok(ReadGuard::nested(self, record));
        }

        if !self.try_acquire_read(record) {
            let mut backoff = Backoff::new(&self.config);
            loop {
                self.throw_if_impatient(record)?;
                if self.try_acquire_read(record) {
                    break;
                }
                if record.is_impatient() {
                    self.throw_if_cancelled()?;
                }
                self.wait_a_bit(record, &mut backoff)?;
            }
        }
        Ok(ReadGuard::acquired(self, record))
    }

    fn wait_a_bit(&self, record: &ReaderRecord, backoff: &mut Backoff) -> Result<(), Error> {
        match backoff.next_step() {
            Step::Spin => thread::yield_now(),
            Step::Park(interval) => {
                let _blocked = BlockedScope::enter(record);
                self.throw_if_impatient(record)?;
                if self.write_requested.load(Ordering::SeqCst) {
                    trace!("reader {} parks behind the writer", record.owner());
                    thread::park_timeout(interval); // unparked by write_unlock
                }
            }
        }
        Ok(())
    }

    fn try_read<'a>(&'a self, record: &'a ReaderRecord) -> Option<ReadGuard<'a>> {
        self.check_read_thread_access(record);
        if record.is_read_requested() {
            return Some(ReadGuard::nested(self, record));
        }
        if self.try_acquire_read(record) {
            Some(ReadGuard::acquired(self, record))
        } else {
            None
        }
    }

    fn end_read(&self, record: &ReaderRecord) {
        self.check_read_thread_access(record);
        assert!(
            record.is_read_requested(),
            "end_read without a matching start_read on {}",
            record.owner()
        );
        record.set_read_requested(false);
        if self.write_requested.load(Ordering::SeqCst) {
            self.unpark_writer();
        }
    }

    fn unpark_writer(&self) {
        let handle = self.writer_handle.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(writer) = handle.as_ref() {
            writer.unpark();
        }
    }

    // ---- write side -------------------------------------------------------

    fn check_write_thread_access(&self) {
        let me = current_thread_token();
        assert!(
            self.writer_thread.load(Ordering::SeqCst) == me.as_u64(),
            "write access requested from {}, which is not the writer thread",
            me
        );
    }

    /// Claim the writer identity. Readers are not excluded yet.
    ///
    /// Blocks while another thread holds write intent. Not reentrant.
    pub fn write_intent_lock(&self) {
        let me = current_thread_token();
        assert!(
            self.writer_thread.load(Ordering::SeqCst) != me.as_u64(),
            "write_intent_lock is not reentrant ({me} already holds write intent)"
        );
        assert!(
            !self.is_read_locked_by_current_thread(),
            "{me} holds read access and would deadlock waiting for itself"
        );

        let mut backoff = Backoff::new(&self.config);
        let mut queued = false;
        while self
            .write_intent
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            match backoff.next_step() {
                Step::Spin => thread::yield_now(),
                Step::Park(interval) => {
                    if !queued {
                        self.intent_waiters.push(thread::current());
                        queued = true;
                    }
                    thread::park_timeout(interval);
                }
            }
        }

        assert!(
            !self.write_requested.load(Ordering::SeqCst) && !self.write_acquired.load(Ordering::SeqCst),
            "write intent acquired while a write is still in progress"
        );
        *self.writer_handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread::current());
        self.writer_thread.store(me.as_u64(), Ordering::SeqCst);
        debug!("{me} acquired write intent");
    }

    /// Give up the writer identity and wake one thread waiting for it.
    pub fn write_intent_unlock(&self) {
        self.check_write_thread_access();
        assert!(
            !self.write_requested.load(Ordering::SeqCst) && !self.write_acquired.load(Ordering::SeqCst),
            "write_intent_unlock while the write lock is still held"
        );
        *self.writer_handle.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.writer_thread.store(NO_THREAD, Ordering::SeqCst);
        self.write_intent.store(false, Ordering::SeqCst);
        if let Some(waiter) = self.intent_waiters.pop() {
            waiter.unpark();
        }
        debug!("{} released write intent", current_thread_token());
    }

    /// Exclude readers: new readers back off immediately, then this waits
    /// until every reader already inside has left.
    pub fn write_lock(&self) {
        self.check_write_thread_access();
        assert!(
            !self.write_requested.load(Ordering::SeqCst),
            "write_lock is not reentrant"
        );
        assert!(!self.write_acquired.load(Ordering::SeqCst));

        self.write_requested.store(true, Ordering::SeqCst);
        let mut backoff = Backoff::new(&self.config);
        loop {
            if self.readers.all_idle() {
                self.write_acquired.store(true, Ordering::SeqCst);
                break;
            }
            match backoff.next_step() {
                Step::Spin => thread::yield_now(),
                Step::Park(interval) => {
                    counter!(WRITER_PARKS_TOTAL).increment(1);
                    thread::park_timeout(interval); // unparked by end_read
                }
            }
        }
        counter!(WRITE_LOCKS_TOTAL).increment(1);
        debug!("write lock acquired after {} attempts", backoff.iteration() + 1);
    }

    /// Let readers back in, wake the parked ones and, at most once per
    /// `gc_interval`, drop the records of readers whose handle is gone.
    pub fn write_unlock(&self) {
        self.check_write_thread_access();
        assert!(
            self.write_acquired.load(Ordering::SeqCst),
            "write_unlock without a matching write_lock"
        );
        self.write_acquired.store(false, Ordering::SeqCst);
        self.write_requested.store(false, Ordering::SeqCst);

        let report = self.readers.wake_blocked(self.gc_due());
        if report.collected > 0 {
            counter!(DEAD_READERS_COLLECTED_TOTAL).increment(report.collected as u64);
            info!(
                "collected {} dead reader record(s), {} remain",
                report.collected,
                self.readers.len()
            );
        }
        debug!("write lock released, woke {} reader(s)", report.woken);
    }

    fn gc_due(&self) -> bool {
        let now = duration_nanos(self.created.elapsed());
        let last = self.last_gc_nanos.load(Ordering::Relaxed);
        if last == GC_NEVER || now.saturating_sub(last) >= duration_nanos(self.config.gc_interval) {
            self.last_gc_nanos.store(now, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Reclaim dead reader records now, ignoring the GC throttle.
    pub fn collect_dead_readers(&self) -> usize {
        let n = self.readers.collect_dead();
        if n > 0 {
            counter!(DEAD_READERS_COLLECTED_TOTAL).increment(n as u64);
        }
        n
    }

    /// Temporarily release the write lock. Dropping the returned token runs
    /// the pre-write hooks and re-acquires it.
    pub fn write_suspend(&self) -> WriteSuspension<'_> {
        self.check_write_thread_access();
        assert!(
            self.write_acquired.load(Ordering::SeqCst),
            "write_suspend requires the write lock"
        );
        let was_suspended = self.write_suspended.swap(true, Ordering::SeqCst);
        self.write_unlock();
        debug!("write lock suspended");
        WriteSuspension {
            lock: self,
            was_suspended,
            _not_send: PhantomData,
        }
    }

    /// Run `f` with the write lock released, re-acquiring it afterwards.
    pub fn write_suspend_while<R>(&self, f: impl FnOnce() -> R) -> R {
        let _resume = self.write_suspend();
        f()
    }

    fn resume_write(&self, was_suspended: bool) {
        self.run_pre_write_hooks();
        self.write_lock();
        self.write_suspended.store(was_suspended, Ordering::SeqCst);
        debug!("write lock resumed");
    }

    pub fn add_pre_write_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.pre_write_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    fn run_pre_write_hooks(&self) {
        // Cloned so a hook may register further hooks.
        let hooks: Vec<PreWriteHook> = self
            .pre_write_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            hook();
        }
    }

    // ---- queries ----------------------------------------------------------

    /// True while the writer holds full exclusion.
    pub fn is_write_locked(&self) -> bool {
        self.write_acquired.load(Ordering::SeqCst)
    }

    pub fn is_write_requested(&self) -> bool {
        self.write_requested.load(Ordering::SeqCst)
    }

    pub fn is_write_suspended(&self) -> bool {
        self.write_suspended.load(Ordering::SeqCst)
    }

    pub fn is_writer_thread(&self) -> bool {
        self.writer_thread.load(Ordering::SeqCst) == current_thread_token().as_u64()
    }

    pub fn writer_thread(&self) -> Option<ThreadToken> {
        ThreadToken::from_raw(self.writer_thread.load(Ordering::SeqCst))
    }

    /// False for the writer thread and for threads that never registered.
    pub fn is_read_locked_by_current_thread(&self) -> bool {
        self.readers
            .find_by_owner(current_thread_token())
            .is_some_and(|(_, record)| record.is_read_requested())
    }

    /// True when any registered reader holds or is asserting read access.
    pub fn is_read_acquired_by_any(&self) -> bool {
        !self.readers.all_idle()
    }
}

impl fmt::Debug for ReadMostlyLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadMostlyLock")
            .field("writer_thread", &self.writer_thread())
            .field("write_requested", &self.is_write_requested())
            .field("write_acquired", &self.is_write_locked())
            .field("write_suspended", &self.is_write_suspended())
            .field("readers", &self.readers.len())
            .finish()
    }
}

/// Raises the reader's `blocked` flag while it may be parked.
struct BlockedScope<'a> {
    record: &'a ReaderRecord,
}

impl<'a> BlockedScope<'a> {
    fn enter(record: &'a ReaderRecord) -> Self {
        record.set_blocked(true);
        Self { record }
    }
}

impl Drop for BlockedScope<'_> {
    fn drop(&mut self) {
        self.record.set_blocked(false);
    }
}

/// A reader registered on one thread. Not `Send`: the record it shares with
/// the thread's other handles may only be mutated by that thread.
pub struct ReaderHandle<'a> {
    lock: &'a ReadMostlyLock,
    record: Arc<ReaderRecord>,
    id: ReaderId,
    _not_send: PhantomData<*const ()>,
}

impl<'a> ReaderHandle<'a> {
    pub fn id(&self) -> ReaderId {
        self.id
    }

    pub fn lock(&self) -> &'a ReadMostlyLock {
        self.lock
    }

    /// Acquire read access, waiting while a write is pending.
    ///
    /// Returns a no-op guard if this reader already holds read access.
    /// Fails only for impatient readers facing a pending write, or when the
    /// host cancels the operation of a blocked impatient reader.
    pub fn start_read(&self) -> Result<ReadGuard<'_>, Error> {
        self.lock.start_read(&self.record)
    }

    /// Single non-blocking attempt; `None` if a write is pending.
    pub fn try_read(&self) -> Option<ReadGuard<'_>> {
        self.lock.try_read(&self.record)
    }

    /// Release read access. Same as dropping the guard.
    pub fn end_read(&self, guard: ReadGuard<'_>) {
        drop(guard);
    }

    /// Run `f` with this reader impatient: waiting for a pending write fails
    /// with [`Error::CannotRunReadAction`] instead of blocking.
    pub fn run_impatient<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = ImpatientScope::enter(&self.record);
        f()
    }

    /// Re-check, while holding read access, whether an impatient reader
    /// should abandon its work.
    pub fn check_read_cancelled(&self) -> Result<(), Error> {
        self.lock.throw_if_impatient(&self.record)
    }

    pub fn is_read_locked(&self) -> bool {
        self.record.is_read_requested()
    }

    pub fn is_impatient(&self) -> bool {
        self.record.is_impatient()
    }

    /// Remove the record from the registry right away. While other handles
    /// of this thread still share the record it stays registered.
    pub fn deregister(self) {
        assert!(
            !self.record.is_read_requested(),
            "reader {} deregistered while holding read access",
            self.id
        );
        if Arc::strong_count(&self.record) == 1 {
            self.lock.readers.deregister(self.id);
        }
    }
}

impl fmt::Debug for ReaderHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderHandle")
            .field("id", &self.id)
            .field("owner", &self.record.owner())
            .field("read_locked", &self.is_read_locked())
            .finish()
    }
}

/// Represents acquired read access.
/// Access is released when this guard is dropped.
#[must_use = "if unused the read lock will immediately unlock"]
pub struct ReadGuard<'a> {
    lock: &'a ReadMostlyLock,
    record: &'a ReaderRecord,
    /// False for the no-op guard handed out to a reader already holding access.
    owns: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a> ReadGuard<'a> {
    fn acquired(lock: &'a ReadMostlyLock, record: &'a ReaderRecord) -> Self {
        Self { lock, record, owns: true, _not_send: PhantomData }
    }

    fn nested(lock: &'a ReadMostlyLock, record: &'a ReaderRecord) -> Self {
        Self { lock, record, owns: false, _not_send: PhantomData }
    }

    /// True if dropping this guard releases read access.
    pub fn owns_lock(&self) -> bool {
        self.owns
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if self.owns {
            self.lock.end_read(self.record);
        }
    }
}

/// Represents a temporarily released write lock.
/// Dropping it re-acquires the write lock on the writer thread.
#[must_use = "if unused the write lock is re-acquired immediately"]
pub struct WriteSuspension<'a> {
    lock: &'a ReadMostlyLock,
    was_suspended: bool,
    _not_send: PhantomData<*const ()>,
}

impl Drop for WriteSuspension<'_> {
    fn drop(&mut self) {
        self.lock.resume_write(self.was_suspended);
    }
}
