use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Listen for the global emergency-stop hotkey Cmd+Shift+X on a background
/// thread. Sets `flag` when pressed; the controller turns it into a stop.
#[cfg(target_os = "macos")]
pub fn start_stop_hotkey(flag: Arc<AtomicBool>) {
    use std::ffi::c_void;

    type CGEventTapProxy = *mut c_void;
    type CGEventRef = *mut c_void;
    type CFMachPortRef = *mut c_void;
    type CFRunLoopSourceRef = *mut c_void;
    type CFRunLoopRef = *mut c_void;
    type CFStringRef = *const c_void;
    type CGEventMask = u64;
    type CGEventType = u32;
    type CGEventFlags = u64;

    type CGEventTapCallBack = unsafe extern "C" fn(
        CGEventTapProxy,
        CGEventType,
        CGEventRef,
        *mut c_void,
    ) -> CGEventRef;

    const K_CG_HID_EVENT_TAP: u32 = 0;
    const K_CG_HEAD_INSERT_EVENT_TAP: u32 = 0;
    const K_CG_EVENT_TAP_OPTION_LISTEN_ONLY: u32 = 1;
    const CG_EVENT_KEY_DOWN: u32 = 10;
    const K_CG_KEYBOARD_EVENT_KEYCODE: u32 = 9;

    const FLAG_SHIFT: u64 = 0x00020000;
    const FLAG_COMMAND: u64 = 0x00100000;

    const KEYCODE_X: i64 = 7;

    extern "C" {
        fn CGEventTapCreate(
            tap: u32,
            place: u32,
            options: u32,
            events_of_interest: CGEventMask,
            callback: CGEventTapCallBack,
            user_info: *mut c_void,
        ) -> CFMachPortRef;
        fn CFMachPortCreateRunLoopSource(
            allocator: *const c_void,
            port: CFMachPortRef,
            order: i64,
        ) -> CFRunLoopSourceRef;
        fn CFRunLoopGetCurrent() -> CFRunLoopRef;
        fn CFRunLoopAddSource(rl: CFRunLoopRef, source: CFRunLoopSourceRef, mode: CFStringRef);
        fn CFRunLoopRun();
        fn CGEventGetFlags(event: CGEventRef) -> CGEventFlags;
        fn CGEventGetIntegerValueField(event: CGEventRef, field: u32) -> i64;
        fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);

        static kCFRunLoopCommonModes: CFStringRef;
    }

    unsafe extern "C" fn on_key(
        _proxy: CGEventTapProxy,
        event_type: CGEventType,
        event: CGEventRef,
        user_info: *mut c_void,
    ) -> CGEventRef {
        unsafe {
            if event_type != CG_EVENT_KEY_DOWN {
                return event;
            }
            let flags = CGEventGetFlags(event);
            let keycode = CGEventGetIntegerValueField(event, K_CG_KEYBOARD_EVENT_KEYCODE);
            let combo = flags & FLAG_COMMAND != 0 && flags & FLAG_SHIFT != 0;
            if keycode == KEYCODE_X && combo {
                let flag = &*(user_info as *const AtomicBool);
                flag.store(true, Ordering::Release);
            }
            event
        }
    }

    std::thread::spawn(move || unsafe {
        let mask: CGEventMask = 1 << CG_EVENT_KEY_DOWN;
        let flag_ptr = Arc::into_raw(flag) as *mut c_void;

        let tap = CGEventTapCreate(
            K_CG_HID_EVENT_TAP,
            K_CG_HEAD_INSERT_EVENT_TAP,
            K_CG_EVENT_TAP_OPTION_LISTEN_ONLY,
            mask,
            on_key,
            flag_ptr,
        );
        if tap.is_null() {
            crate::logger::error(
                "stop hotkey unavailable: grant Accessibility permission to your terminal",
            );
            let _ = Arc::from_raw(flag_ptr as *const AtomicBool);
            return;
        }

        let source = CFMachPortCreateRunLoopSource(std::ptr::null(), tap, 0);
        CFRunLoopAddSource(CFRunLoopGetCurrent(), source, kCFRunLoopCommonModes);
        CGEventTapEnable(tap, true);
        crate::logger::info("stop hotkey Cmd+Shift+X registered");
        CFRunLoopRun(); // blocks forever
    });
}

/// Listen for the global emergency-stop hotkey Ctrl+Shift+X (Windows).
#[cfg(target_os = "windows")]
pub fn start_stop_hotkey(flag: Arc<AtomicBool>) {
    use std::ffi::c_void;

    type HWND = *mut c_void;

    #[repr(C)]
    struct POINT {
        x: i32,
        y: i32,
    }

    #[repr(C)]
    struct MSG {
        hwnd: HWND,
        message: u32,
        w_param: usize,
        l_param: isize,
        time: u32,
        pt: POINT,
    }

    const MOD_CONTROL: u32 = 0x0002;
    const MOD_SHIFT: u32 = 0x0004;
    const MOD_NOREPEAT: u32 = 0x4000;
    const VK_X: u32 = 0x58;
    const WM_HOTKEY: u32 = 0x0312;
    const HOTKEY_ID: i32 = 1;

    #[link(name = "user32")]
    extern "system" {
        fn RegisterHotKey(hwnd: HWND, id: i32, fs_modifiers: u32, vk: u32) -> i32;
        fn GetMessageW(msg: *mut MSG, hwnd: HWND, min: u32, max: u32) -> i32;
    }

    std::thread::spawn(move || unsafe {
        let ok = RegisterHotKey(
            std::ptr::null_mut(),
            HOTKEY_ID,
            MOD_CONTROL | MOD_SHIFT | MOD_NOREPEAT,
            VK_X,
        );
        if ok == 0 {
            crate::logger::error("stop hotkey Ctrl+Shift+X already claimed by another application");
            return;
        }
        crate::logger::info("stop hotkey Ctrl+Shift+X registered");

        let mut msg: MSG = std::mem::zeroed();
        // GetMessageW returns 0 on WM_QUIT
        while GetMessageW(&mut msg, std::ptr::null_mut(), 0, 0) > 0 {
            if msg.message == WM_HOTKEY && msg.w_param == HOTKEY_ID as usize {
                flag.store(true, Ordering::Release);
            }
        }
    });
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub fn start_stop_hotkey(_flag: Arc<AtomicBool>) {
    crate::logger::warn("global stop hotkey not supported on this platform; use Esc in the controller");
}
