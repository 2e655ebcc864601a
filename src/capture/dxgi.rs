//! DXGI Desktop Duplication backend
//!
//! Opens a D3D11 device on the requested adapter, duplicates the requested output and
//! copies every acquired desktop texture into one CPU-readable staging texture.

use std::ffi::c_void;
use std::mem::size_of;

use tracing::{debug, info};
use windows::core::{Interface, HRESULT};
use windows::Win32::Foundation::{E_ACCESSDENIED, HMODULE, POINT, RECT};
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_UNKNOWN;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
    D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAPPED_SUBRESOURCE,
    D3D11_MAP_READ, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, IDXGIAdapter1, IDXGIFactory1, IDXGIOutput1, IDXGIOutputDuplication,
    IDXGIResource, DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_NOT_CURRENTLY_AVAILABLE,
    DXGI_ERROR_NOT_FOUND, DXGI_ERROR_SESSION_DISCONNECTED, DXGI_ERROR_UNSUPPORTED,
    DXGI_ERROR_WAIT_TIMEOUT,
    DXGI_OUTDUPL_FRAME_INFO, DXGI_OUTDUPL_MOVE_RECT, DXGI_OUTDUPL_POINTER_SHAPE_INFO,
};

use crate::capture::cursor::{PointerShapeInfo, PointerShapeKind};
use crate::capture::frame::{CaptureTarget, MoveRect, OutputDesc, Point, RawRect};
use crate::capture::platform::{
    Duplication, FrameMetadataSource, Platform, PlatformResult, PointerPosition, PointerShapeSource,
    RawFrameInfo, StagingSurface,
};
use crate::error::{PlatformError, PlatformErrorKind};

// MoveRect and RawRect are passed to DXGI in place of the native records
const _: () = assert!(size_of::<MoveRect>() == size_of::<DXGI_OUTDUPL_MOVE_RECT>());
const _: () = assert!(size_of::<RawRect>() == size_of::<RECT>());

/// Secure desktop (UAC, lock screen) and session disconnects count as access lost
fn error_kind(code: HRESULT) -> PlatformErrorKind {
    if code == DXGI_ERROR_ACCESS_LOST
        || code == E_ACCESSDENIED
        || code == DXGI_ERROR_SESSION_DISCONNECTED
    {
        PlatformErrorKind::AccessLost
    } else if code == DXGI_ERROR_NOT_CURRENTLY_AVAILABLE {
        PlatformErrorKind::NotCurrentlyAvailable
    } else if code == DXGI_ERROR_UNSUPPORTED {
        PlatformErrorKind::Unsupported
    } else {
        PlatformErrorKind::Other
    }
}

fn platform_error(e: windows::core::Error) -> PlatformError {
    let code = e.code();
    PlatformError::new(error_kind(code), e.message().to_string()).with_code(code.0)
}

fn point(p: POINT) -> Point {
    Point::new(p.x, p.y)
}

/// Desktop duplication through DXGI 1.2
#[derive(Debug, Default, Clone, Copy)]
pub struct DxgiPlatform;

impl DxgiPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl Platform for DxgiPlatform {
    type Duplication = DxgiDuplication;

    fn open_output(&self, target: CaptureTarget) -> PlatformResult<(OutputDesc, DxgiDuplication)> {
        unsafe {
            let factory: IDXGIFactory1 = CreateDXGIFactory1().map_err(platform_error)?;

            let adapter: IDXGIAdapter1 = factory.EnumAdapters1(target.adapter).map_err(|e| {
                if e.code() == DXGI_ERROR_NOT_FOUND {
                    PlatformError::new(PlatformErrorKind::AdapterNotFound, e.message().to_string())
                } else {
                    platform_error(e)
                }
            })?;

            let output = adapter.EnumOutputs(target.output).map_err(|e| {
                if e.code() == DXGI_ERROR_NOT_FOUND {
                    PlatformError::new(PlatformErrorKind::OutputNotFound, e.message().to_string())
                } else {
                    platform_error(e)
                }
            })?;
            let out_desc = output.GetDesc().map_err(platform_error)?;

            let mut device: Option<ID3D11Device> = None;
            let mut context: Option<ID3D11DeviceContext> = None;
            D3D11CreateDevice(
                &adapter,
                D3D_DRIVER_TYPE_UNKNOWN,
                HMODULE::default(),
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
            .map_err(platform_error)?;
            let device = device
                .ok_or_else(|| PlatformError::other("D3D11CreateDevice returned no device"))?;
            let context = context
                .ok_or_else(|| PlatformError::other("D3D11CreateDevice returned no context"))?;

            let output1: IDXGIOutput1 = output.cast().map_err(|e| {
                PlatformError::new(PlatformErrorKind::Unsupported, e.message().to_string())
            })?;
            let duplication = output1.DuplicateOutput(&device).map_err(platform_error)?;

            let bounds = out_desc.DesktopCoordinates;
            let name_len = out_desc
                .DeviceName
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(out_desc.DeviceName.len());
            let desc = OutputDesc {
                name: String::from_utf16_lossy(&out_desc.DeviceName[..name_len]),
                width: (bounds.right - bounds.left) as u32,
                height: (bounds.bottom - bounds.top) as u32,
            };
            info!(output = %desc.name, "DXGI output duplicated");

            Ok((
                desc,
                DxgiDuplication {
                    device,
                    context,
                    duplication,
                    resource: None,
                },
            ))
        }
    }
}

pub struct DxgiDuplication {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    duplication: IDXGIOutputDuplication,
    /// Desktop image of the currently acquired frame
    resource: Option<IDXGIResource>,
}

impl Duplication for DxgiDuplication {
    type Surface = DxgiSurface;

    fn create_surface(&mut self, width: u32, height: u32) -> PlatformResult<DxgiSurface> {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: 0,
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: 0,
        };

        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { self.device.CreateTexture2D(&desc, None, Some(&mut texture)) }
            .map_err(platform_error)?;
        let texture = texture
            .ok_or_else(|| PlatformError::other("CreateTexture2D returned no texture"))?;
        debug!(width, height, "staging texture created");

        Ok(DxgiSurface {
            texture,
            context: self.context.clone(),
            height,
            mapped: None,
        })
    }

    fn acquire_next_frame(&mut self, timeout_ms: u32) -> PlatformResult<Option<RawFrameInfo>> {
        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;

        match unsafe { self.duplication.AcquireNextFrame(timeout_ms, &mut info, &mut resource) } {
            Ok(()) => {}
            Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(None),
            Err(e) => return Err(platform_error(e)),
        }
        self.resource = resource;

        Ok(Some(RawFrameInfo {
            last_present_time: info.LastPresentTime,
            last_mouse_update_time: info.LastMouseUpdateTime,
            accumulated_frames: info.AccumulatedFrames,
            rects_coalesced: info.RectsCoalesced.as_bool(),
            protected_content_masked_out: info.ProtectedContentMaskedOut.as_bool(),
            pointer_position: PointerPosition {
                position: point(info.PointerPosition.Position),
                visible: info.PointerPosition.Visible.as_bool(),
            },
            total_metadata_buffer_size: info.TotalMetadataBufferSize,
            pointer_shape_buffer_size: info.PointerShapeBufferSize,
        }))
    }

    fn copy_frame_to(&mut self, surface: &mut DxgiSurface) -> PlatformResult<()> {
        let resource = self
            .resource
            .as_ref()
            .ok_or_else(|| PlatformError::other("no desktop resource for this frame"))?;
        let texture: ID3D11Texture2D = resource.cast().map_err(platform_error)?;
        unsafe { self.context.CopyResource(&surface.texture, &texture) };
        Ok(())
    }

    fn release_frame(&mut self) -> PlatformResult<()> {
        self.resource = None;
        unsafe { self.duplication.ReleaseFrame() }.map_err(platform_error)
    }
}

impl FrameMetadataSource for DxgiDuplication {
    fn frame_move_rects(&mut self, buffer: &mut [MoveRect]) -> PlatformResult<u32> {
        let mut required = 0u32;
        unsafe {
            self.duplication.GetFrameMoveRects(
                (buffer.len() * size_of::<MoveRect>()) as u32,
                buffer.as_mut_ptr().cast::<DXGI_OUTDUPL_MOVE_RECT>(),
                &mut required,
            )
        }
        .map_err(platform_error)?;
        Ok(required)
    }

    fn frame_dirty_rects(&mut self, buffer: &mut [RawRect]) -> PlatformResult<u32> {
        let mut required = 0u32;
        unsafe {
            self.duplication.GetFrameDirtyRects(
                (buffer.len() * size_of::<RawRect>()) as u32,
                buffer.as_mut_ptr().cast::<RECT>(),
                &mut required,
            )
        }
        .map_err(platform_error)?;
        Ok(required)
    }
}

impl PointerShapeSource for DxgiDuplication {
    fn frame_pointer_shape(
        &mut self,
        buffer: &mut [u8],
    ) -> PlatformResult<(u32, PointerShapeInfo)> {
        let mut required = 0u32;
        let mut info = DXGI_OUTDUPL_POINTER_SHAPE_INFO::default();
        unsafe {
            self.duplication.GetFramePointerShape(
                buffer.len() as u32,
                buffer.as_mut_ptr().cast::<c_void>(),
                &mut required,
                &mut info,
            )
        }
        .map_err(platform_error)?;

        Ok((
            required,
            PointerShapeInfo {
                kind: PointerShapeKind::from(info.Type),
                width: info.Width,
                height: info.Height,
                pitch: info.Pitch,
                hot_spot: point(info.HotSpot),
            },
        ))
    }
}

/// Staging texture with CPU read access
pub struct DxgiSurface {
    texture: ID3D11Texture2D,
    context: ID3D11DeviceContext,
    height: u32,
    mapped: Option<(*const u8, usize)>,
}

impl StagingSurface for DxgiSurface {
    fn map(&mut self) -> PlatformResult<usize> {
        let mut sub = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            self.context
                .Map(&self.texture, 0, D3D11_MAP_READ, 0, Some(&mut sub))
        }
        .map_err(platform_error)?;

        let pitch = sub.RowPitch as usize;
        self.mapped = Some((sub.pData as *const u8, pitch * self.height as usize));
        Ok(pitch)
    }

    fn mapped(&self) -> Option<&[u8]> {
        // The mapping stays valid until unmap, which needs &mut self
        self.mapped
            .map(|(ptr, len)| unsafe { std::slice::from_raw_parts(ptr, len) })
    }

    fn unmap(&mut self) {
        if self.mapped.take().is_some() {
            unsafe { self.context.Unmap(&self.texture, 0) };
        }
    }
}

impl Drop for DxgiSurface {
    fn drop(&mut self) {
        self.unmap();
    }
}
