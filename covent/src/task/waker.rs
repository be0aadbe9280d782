#![allow(unsafe_op_in_unsafe_fn)]

use crate::task::Header;
use crate::task::raw::RawTask;

use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops;
use std::ptr::NonNull;
use std::task::{RawWaker, RawWakerVTable, Waker};

pub(super) struct WakerRef<'a> {
    waker: ManuallyDrop<Waker>,
    _p: PhantomData<&'a Header>,
}

/// Returns a `WakerRef` which avoids touching the refcount unless the waker
/// is actually cloned by the body.
pub(super) fn waker_ref(header: &NonNull<Header>) -> WakerRef<'_> {
    // A single vtable keeps `Waker::will_wake` meaningful for the frame's own
    // waker. The borrowed instance must never be dropped.
    let waker = unsafe { ManuallyDrop::new(Waker::from_raw(raw_waker(*header))) };

    WakerRef {
        waker,
        _p: PhantomData,
    }
}

impl ops::Deref for WakerRef<'_> {
    type Target = Waker;

    fn deref(&self) -> &Waker {
        &self.waker
    }
}

unsafe fn clone_waker(ptr: *const ()) -> RawWaker {
    let header = NonNull::new_unchecked(ptr as *mut Header);
    header.as_ref().ref_inc();
    raw_waker(header)
}

unsafe fn drop_waker(ptr: *const ()) {
    let ptr = NonNull::new_unchecked(ptr as *mut Header);
    let header = ptr.as_ref();

    if header.is_owned_here() {
        RawTask::from_raw(ptr).drop_reference();
    } else if header.ref_dec() {
        // Off the owner thread only the refcount may be touched. The frame
        // and its result are freed where they were created.
        header.inbox.push_release(ptr);
    }
}

// Resume, then give back the reference owned by the waker.
unsafe fn wake_by_val(ptr: *const ()) {
    let ptr = NonNull::new_unchecked(ptr as *mut Header);
    let header = ptr.as_ref();

    if !header.is_owned_here() {
        // The waker's reference travels with the wake.
        header.inbox.push_wake(ptr);
        return;
    }

    let raw = RawTask::from_raw(ptr);
    raw.resume();
    raw.drop_reference();
}

unsafe fn wake_by_ref(ptr: *const ()) {
    let ptr = NonNull::new_unchecked(ptr as *mut Header);
    let header = ptr.as_ref();

    if !header.is_owned_here() {
        header.ref_inc();
        header.inbox.push_wake(ptr);
        return;
    }

    RawTask::from_raw(ptr).resume();
}

static WAKER_VTABLE: RawWakerVTable =
    RawWakerVTable::new(clone_waker, wake_by_val, wake_by_ref, drop_waker);

fn raw_waker(header: NonNull<Header>) -> RawWaker {
    let ptr = header.as_ptr() as *const ();
    RawWaker::new(ptr, &WAKER_VTABLE)
}
