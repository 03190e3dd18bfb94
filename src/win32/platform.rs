/*
 * Native window primitive on Win32. Each managed window is a pair: a container
 * (an owned top-level frame with system chrome, parented to the host window)
 * and a child surface filling its client area. The surface HWND is the
 * `NativeHandle` the lifecycle subsystem tracks; the container is exposed as
 * the `HostContainer` whose close is the graceful path.
 *
 * The pair is closed and destroyed as a unit. `WM_CLOSE` on the container is
 * left to `DefWindowProcW`, which destroys the frame and its surface; `WM_CLOSE`
 * on the surface is forwarded to its container. A forced destroy also takes
 * down the container, so no empty frame is left behind.
 */
use super::{handle_from_hwnd, hiword_from_lparam, hwnd_from_handle, loword_from_lparam};
use crate::error::{PlatformError, Result as PlatformResult};
use crate::platform::{CreatedWindow, HostContainer, WindowPlatform};
use crate::types::{Bounds, NativeHandle, SurfaceContent, WindowConfig, WindowId};

use windows::Win32::{
    Foundation::{
        ERROR_INVALID_WINDOW_HANDLE, GetLastError, HINSTANCE, HWND, LPARAM, LRESULT, RECT, WPARAM,
    },
    Graphics::Gdi::{COLOR_WINDOW, HBRUSH},
    System::LibraryLoader::GetModuleHandleW,
    UI::WindowsAndMessaging::*,
};
use windows::core::{HSTRING, PCWSTR};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::c_void;
use std::rc::Rc;

pub const DEFAULT_MAX_PUMP_MESSAGES: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowRole {
    Container,
    Surface,
}

// Passed through `lpCreateParams` and owned by the window from WM_NCCREATE until WM_NCDESTROY.
struct WindowCreationContext {
    window_id: WindowId,
    role: WindowRole,
    adopted: Rc<Cell<bool>>,
}

/*
 * Frees a creation context that no window procedure ever took ownership of.
 * Once adopted, the context belongs to the window and is freed on WM_NCDESTROY,
 * even when creation fails later on.
 */
fn reclaim_unadopted_context(
    context: *mut WindowCreationContext,
    adopted: &Rc<Cell<bool>>,
) -> bool {
    if adopted.get() || context.is_null() {
        return false;
    }
    drop(unsafe { Box::from_raw(context) });
    true
}

pub struct Win32Platform {
    h_instance: HINSTANCE,
    container_class: HSTRING,
    surface_class: HSTRING,
    max_pump_messages: Cell<u32>,
    // Surface handle to the container it was created in.
    containers: RefCell<HashMap<NativeHandle, HWND>>,
}

impl Win32Platform {
    pub fn new(app_name: &str) -> PlatformResult<Rc<Self>> {
        let h_instance: HINSTANCE = unsafe { GetModuleHandleW(None)? }.into();
        let platform = Self {
            h_instance,
            container_class: HSTRING::from(format!("{app_name}_HostViewContainer")),
            surface_class: HSTRING::from(format!("{app_name}_HostViewSurface")),
            max_pump_messages: Cell::new(DEFAULT_MAX_PUMP_MESSAGES),
            containers: RefCell::new(HashMap::new()),
        };
        platform.register_window_class(&platform.container_class)?;
        platform.register_window_class(&platform.surface_class)?;
        Ok(Rc::new(platform))
    }

    // Caps how many messages one `pump_once` may dispatch.
    pub fn set_max_pump_messages(&self, max_pump_messages: u32) {
        self.max_pump_messages.set(max_pump_messages.max(1));
    }

    fn register_window_class(&self, class_name: &HSTRING) -> PlatformResult<()> {
        let class_name_pcwstr = PCWSTR(class_name.as_ptr());
        unsafe {
            let mut wc_test = WNDCLASSEXW::default();
            if GetClassInfoExW(Some(self.h_instance), class_name_pcwstr, &mut wc_test).is_ok() {
                log::debug!("Win32Platform: Window class '{class_name}' already registered.");
                return Ok(());
            }

            let wc = WNDCLASSEXW {
                cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
                style: CS_HREDRAW | CS_VREDRAW,
                lpfnWndProc: Some(wnd_proc_router),
                cbClsExtra: 0,
                cbWndExtra: 0,
                hInstance: self.h_instance,
                hIcon: LoadIconW(None, IDI_APPLICATION)?,
                hCursor: LoadCursorW(None, IDC_ARROW)?,
                hbrBackground: HBRUSH((COLOR_WINDOW.0 + 1) as *mut c_void),
                lpszMenuName: PCWSTR::null(),
                lpszClassName: class_name_pcwstr,
                hIconSm: LoadIconW(None, IDI_APPLICATION)?,
            };

            if RegisterClassExW(&wc) == 0 {
                let error = GetLastError();
                log::error!("Win32Platform: RegisterClassExW failed for '{class_name}': {error:?}");
                return Err(PlatformError::InitializationFailed(format!(
                    "RegisterClassExW failed for '{class_name}': {error:?}"
                )));
            }
        }
        log::debug!("Win32Platform: Window class '{class_name}' registered.");
        Ok(())
    }

    fn create_native_window(
        &self,
        window_id: WindowId,
        role: WindowRole,
        text: &str,
        style: WINDOW_STYLE,
        bounds: Bounds,
        parent: Option<HWND>,
    ) -> PlatformResult<HWND> {
        let class_name = match role {
            WindowRole::Container => &self.container_class,
            WindowRole::Surface => &self.surface_class,
        };
        let adopted = Rc::new(Cell::new(false));
        let creation_context = Box::into_raw(Box::new(WindowCreationContext {
            window_id,
            role,
            adopted: Rc::clone(&adopted),
        }));

        let created = unsafe {
            CreateWindowExW(
                WINDOW_EX_STYLE(0),
                class_name,
                &HSTRING::from(text),
                style,
                bounds.x,
                bounds.y,
                bounds.width,
                bounds.height,
                parent,
                None,
                Some(self.h_instance),
                Some(creation_context as *const c_void),
            )
        };

        match created {
            Ok(hwnd) => Ok(hwnd),
            Err(err) => {
                if reclaim_unadopted_context(creation_context, &adopted) {
                    log::trace!("Win32Platform: Creation context for WinID {window_id:?} reclaimed.");
                }
                log::error!(
                    "Win32Platform: CreateWindowExW failed for WinID {window_id:?} ({role:?}): {err}"
                );
                Err(err.into())
            }
        }
    }

    fn client_bounds(hwnd: HWND) -> Bounds {
        let mut client = RECT::default();
        if unsafe { GetClientRect(hwnd, &mut client) }.is_err() {
            log::warn!("Win32Platform: GetClientRect failed for {hwnd:?}.");
            return Bounds::sized(0, 0);
        }
        Bounds::sized(client.right - client.left, client.bottom - client.top)
    }

    /*
     * The container a surface was created in, if both still exist and are
     * still related. Stale entries are dropped on the way.
     */
    fn container_of(&self, handle: NativeHandle) -> Option<HWND> {
        let container = *self.containers.borrow().get(&handle)?;
        let surface = hwnd_from_handle(handle);
        let related = unsafe { IsWindow(Some(container)) }.as_bool()
            && unsafe { GetParent(surface) }.is_ok_and(|parent| parent == container);
        if !related {
            self.containers.borrow_mut().remove(&handle);
            return None;
        }
        Some(container)
    }

    fn forget_stale_pairs(&self) {
        self.containers.borrow_mut().retain(|surface, container| {
            unsafe { IsWindow(Some(hwnd_from_handle(*surface))) }.as_bool()
                && unsafe { IsWindow(Some(*container)) }.as_bool()
        });
    }

    fn destroy_quietly(hwnd: HWND) {
        if unsafe { DestroyWindow(hwnd) }.is_err() {
            let last_error = unsafe { GetLastError() };
            if last_error.0 != ERROR_INVALID_WINDOW_HANDLE.0 {
                log::error!("Win32Platform: DestroyWindow for {hwnd:?} failed: {last_error:?}");
            }
        }
    }
}

fn surface_text(content: &SurfaceContent) -> &str {
    match content {
        SurfaceContent::Url(url) => url,
        SurfaceContent::Html(_) => "about:blank",
    }
}

impl WindowPlatform for Win32Platform {
    fn create(&self, window_id: WindowId, config: &WindowConfig) -> PlatformResult<CreatedWindow> {
        let container = self.create_native_window(
            window_id,
            WindowRole::Container,
            &config.title,
            WS_OVERLAPPEDWINDOW | WS_CLIPCHILDREN,
            config.bounds,
            config.parent.map(hwnd_from_handle),
        )?;

        let surface = match self.create_native_window(
            window_id,
            WindowRole::Surface,
            surface_text(&config.content),
            WS_CHILD | WS_VISIBLE | WS_CLIPCHILDREN,
            Self::client_bounds(container),
            Some(container),
        ) {
            Ok(surface) => surface,
            Err(err) => {
                Self::destroy_quietly(container);
                return Err(err);
            }
        };

        self.forget_stale_pairs();
        self.containers
            .borrow_mut()
            .insert(handle_from_hwnd(surface), container);

        if config.visible_on_create {
            unsafe { _ = ShowWindow(container, SW_SHOW) };
        }
        log::debug!(
            "Win32Platform: Created WinID {window_id:?}: container {container:?}, surface {surface:?}."
        );

        Ok(CreatedWindow {
            handle: handle_from_hwnd(surface),
            container: Some(Rc::new(Win32Container::new(container)) as Rc<dyn HostContainer>),
        })
    }

    fn is_valid(&self, handle: NativeHandle) -> bool {
        !handle.is_null() && unsafe { IsWindow(Some(hwnd_from_handle(handle))) }.as_bool()
    }

    fn send_graceful_close(&self, handle: NativeHandle) -> PlatformResult<()> {
        let hwnd = hwnd_from_handle(handle);
        unsafe { PostMessageW(Some(hwnd), WM_CLOSE, WPARAM(0), LPARAM(0)) }.map_err(|err| {
            log::warn!("Win32Platform: Posting WM_CLOSE to {hwnd:?} failed: {err}");
            PlatformError::HandleInvalid(format!("WM_CLOSE to {hwnd:?}: {err}"))
        })
    }

    fn force_destroy(&self, handle: NativeHandle) -> bool {
        // Destroying the container destroys the surface with it.
        let hwnd = self
            .container_of(handle)
            .unwrap_or_else(|| hwnd_from_handle(handle));
        let destroyed = unsafe { DestroyWindow(hwnd) };
        self.containers.borrow_mut().remove(&handle);
        match destroyed {
            Ok(()) => true,
            Err(err) => {
                log::error!("Win32Platform: DestroyWindow for {hwnd:?} failed: {err}");
                false
            }
        }
    }

    fn pump_once(&self, handle: NativeHandle) -> PlatformResult<()> {
        if !self.is_valid(handle) {
            return Err(PlatformError::HandleInvalid(format!(
                "{handle:?} is not a window; nothing to pump"
            )));
        }
        let hwnd = hwnd_from_handle(handle);
        let mut msg = MSG::default();
        for _ in 0..self.max_pump_messages.get() {
            let has_message = unsafe { PeekMessageW(&mut msg, Some(hwnd), 0, 0, PM_REMOVE) };
            if !has_message.as_bool() {
                break;
            }
            unsafe {
                _ = TranslateMessage(&msg);
                _ = DispatchMessageW(&msg);
            }
        }
        Ok(())
    }
}

/*
 * The frame window wrapping a surface. Closing it sends WM_CLOSE synchronously,
 * which lets default processing destroy the frame and its surface.
 */
pub struct Win32Container {
    hwnd: HWND,
}

impl Win32Container {
    pub fn new(hwnd: HWND) -> Self {
        Self { hwnd }
    }

    pub fn hwnd(&self) -> HWND {
        self.hwnd
    }
}

impl HostContainer for Win32Container {
    fn is_visible(&self) -> bool {
        unsafe { IsWindowVisible(self.hwnd) }.as_bool()
    }

    fn close(&self) -> PlatformResult<()> {
        if !unsafe { IsWindow(Some(self.hwnd)) }.as_bool() {
            log::debug!("Win32Container: {:?} already destroyed.", self.hwnd);
            return Ok(());
        }
        let _ = unsafe { SendMessageW(self.hwnd, WM_CLOSE, Some(WPARAM(0)), Some(LPARAM(0))) };
        Ok(())
    }
}

/*
 * Window procedure shared by both classes. The creation context is adopted on
 * WM_NCCREATE and released on WM_NCDESTROY.
 */
unsafe extern "system" fn wnd_proc_router(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let context_ptr = if msg == WM_NCCREATE {
        let create_struct = unsafe { &*(lparam.0 as *const CREATESTRUCTW) };
        let context_raw_ptr = create_struct.lpCreateParams as *mut WindowCreationContext;
        if !context_raw_ptr.is_null() {
            unsafe { (*context_raw_ptr).adopted.set(true) };
        }
        unsafe { SetWindowLongPtrW(hwnd, GWLP_USERDATA, context_raw_ptr as isize) };
        context_raw_ptr
    } else {
        unsafe { GetWindowLongPtrW(hwnd, GWLP_USERDATA) as *mut WindowCreationContext }
    };

    if context_ptr.is_null() {
        return unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) };
    }

    let context = unsafe { &*context_ptr };
    let handled = handle_window_message(context, hwnd, msg, lparam);
    let result = handled.unwrap_or_else(|| unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) });

    if msg == WM_NCDESTROY {
        unsafe { SetWindowLongPtrW(hwnd, GWLP_USERDATA, 0) };
        drop(unsafe { Box::from_raw(context_ptr) });
    }
    result
}

fn handle_window_message(
    context: &WindowCreationContext,
    hwnd: HWND,
    msg: u32,
    lparam: LPARAM,
) -> Option<LRESULT> {
    match (context.role, msg) {
        (WindowRole::Container, WM_SIZE) => {
            let width = loword_from_lparam(lparam);
            let height = hiword_from_lparam(lparam);
            if let Ok(surface) = unsafe { GetWindow(hwnd, GW_CHILD) } {
                unsafe { _ = MoveWindow(surface, 0, 0, width, height, true) };
            }
            Some(LRESULT(0))
        }
        (WindowRole::Surface, WM_CLOSE) => {
            let Ok(container) = (unsafe { GetParent(hwnd) }) else {
                return None;
            };
            log::debug!(
                "Win32Platform: WM_CLOSE for WinID {:?} surface; closing its container {container:?}.",
                context.window_id
            );
            // The pair may be destroyed by this call; `context` is not touched afterwards.
            let _ = unsafe { SendMessageW(container, WM_CLOSE, Some(WPARAM(0)), Some(LPARAM(0))) };
            Some(LRESULT(0))
        }
        (WindowRole::Container, WM_CLOSE) => {
            log::debug!(
                "Win32Platform: WM_CLOSE for WinID {:?} container; default processing destroys it.",
                context.window_id
            );
            None
        }
        (role, WM_DESTROY) => {
            log::debug!(
                "Win32Platform: WM_DESTROY for WinID {:?} ({role:?}) {hwnd:?}.",
                context.window_id
            );
            None
        }
        _ => None,
    }
}
