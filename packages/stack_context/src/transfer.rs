//! In-band records carried by the switch transfer parameter.
//!
//! A non-null `parm` always points at a record beginning with a one-byte
//! kind tag. The record lives in the sending side's frame, which stays alive
//! (suspended) until the receiver has taken what it needs: the receiver
//! never reads from dead stack memory.

use std::any::Any;
use std::mem::ManuallyDrop;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferKind {
    /// A [`DataTransfer`]: arguments or results.
    Data = 1,
    /// An [`ExitRequest`]: the receiving coroutine must unwind itself.
    ExitRequest = 2,
}

#[repr(C)]
pub(crate) struct TransferHeader {
    kind: TransferKind,
}

/// Reads the kind tag of a transfer record.
///
/// # Safety
///
/// `parm` must point at a live transfer record.
pub(crate) unsafe fn kind_of(parm: *mut ()) -> TransferKind {
    // SAFETY: Every record starts with a header, per repr(C).
    unsafe { (*parm.cast::<TransferHeader>()).kind }
}

/// An argument or result tuple crossing a switch.
#[repr(C)]
pub(crate) struct DataTransfer<T> {
    header: TransferHeader,
    /// Manually managed: the receiver moves the value out; an unconsumed
    /// value is dropped by the sender when it reuses or retires the slot.
    value: ManuallyDrop<T>,
}

impl<T> DataTransfer<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            header: TransferHeader {
                kind: TransferKind::Data,
            },
            value: ManuallyDrop::new(value),
        }
    }

    pub(crate) fn as_parm(&mut self) -> *mut () {
        std::ptr::from_mut(self).cast()
    }

    /// Moves the value out of a transfer the peer sent.
    ///
    /// # Safety
    ///
    /// `parm` must point at a live `DataTransfer<T>` whose value has not
    /// been taken yet; after this call it counts as taken.
    pub(crate) unsafe fn take(parm: *mut ()) -> T {
        debug_assert_eq!(
            // SAFETY: Caller guarantees a live record.
            unsafe { kind_of(parm) },
            TransferKind::Data,
            "transfer parameter does not carry data"
        );

        // SAFETY: Caller guarantees a live, untaken DataTransfer<T>.
        let transfer = unsafe { &mut *parm.cast::<Self>() };

        // SAFETY: Not taken before, per the contract.
        unsafe { ManuallyDrop::take(&mut transfer.value) }
    }

    /// Drops a value the receiver never picked up.
    ///
    /// # Safety
    ///
    /// As [`DataTransfer::take`].
    pub(crate) unsafe fn drop_untaken(parm: *mut ()) {
        // SAFETY: Forwarded from the caller.
        drop(unsafe { Self::take(parm) });
    }
}

/// Instructs the receiving coroutine to unwind itself to the sender.
///
/// Delivered by [`signal_exit`][crate::signal_exit] and by the splice
/// trampolines when the spliced closure panics. The destination stack
/// pointer travels in the switch pair itself; the record only carries the
/// payload to re-raise there, if any.
#[repr(C)]
pub(crate) struct ExitRequest {
    header: TransferHeader,
    payload: Option<Box<dyn Any + Send>>,
}

impl ExitRequest {
    pub(crate) fn new(payload: Option<Box<dyn Any + Send>>) -> Self {
        Self {
            header: TransferHeader {
                kind: TransferKind::ExitRequest,
            },
            payload,
        }
    }

    pub(crate) fn as_parm(&mut self) -> *mut () {
        std::ptr::from_mut(self).cast()
    }

    /// Takes the payload out of a request the peer sent.
    ///
    /// # Safety
    ///
    /// `parm` must point at a live `ExitRequest`.
    pub(crate) unsafe fn take_payload(
        parm: *mut (),
    ) -> Option<Box<dyn Any + Send>> {
        // SAFETY: Caller guarantees a live record of this kind.
        let request = unsafe { &mut *parm.cast::<Self>() };
        debug_assert_eq!(request.header.kind, TransferKind::ExitRequest);

        request.payload.take()
    }
}

/// Panic token that carries a coroutine from its current suspension point
/// down to the startup trampoline's catch.
///
/// Raised with `panic_any` from *inside* the coroutine's own frames, so the
/// unwind runs the coroutine's destructors and never crosses an assembly
/// frame. The startup trampoline then executes the cleanup trampoline on
/// `exit_to`, forwarding `payload` for re-raising on the resumer.
pub(crate) struct ExitUnwind {
    /// Saved switch point of the stack that control passes to.
    pub(crate) exit_to: *mut (),
    /// Payload to re-raise at the destination; `None` for a plain exit.
    pub(crate) payload: Option<Box<dyn Any + Send>>,
}

// SAFETY: The token never actually changes threads - coroutines are
// single-threaded - but `panic_any` demands `Send` of every payload.
unsafe impl Send for ExitUnwind {}
