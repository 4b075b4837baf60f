// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use quadrant_render::{RendererSettings, Vec4};
use quadrant_render_gl::GlSettings;
use quadrant_render_vk::{VkSettings, VkVsyncMode};
use serde::Deserialize;
use tracing::{info, warn};

pub const DEFAULT_PATH: &str = "quadrant.toml";

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    pub frames_in_flight: usize,
    pub shader_dir: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            vsync: true,
            vsync_mode: VsyncMode::Mailbox,
            frames_in_flight: 2,
            shader_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "quadrant".to_owned(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub render: RenderCfg,
    pub window: WindowCfg,
}

impl AppCfg {
    pub fn renderer_settings(&self) -> RendererSettings {
        RendererSettings {
            frames_in_flight: self.render.frames_in_flight.max(1),
            clear_color: Vec4::from_array(self.render.clear_color),
            ..RendererSettings::default()
        }
    }

    pub fn vk_settings(&self) -> VkSettings {
        VkSettings {
            vsync: self.render.vsync,
            vsync_mode: match self.render.vsync_mode {
                VsyncMode::Fifo => VkVsyncMode::Fifo,
                VsyncMode::Mailbox => VkVsyncMode::Mailbox,
            },
            shader_dir: self.render.shader_dir.clone(),
        }
    }

    pub fn gl_settings(&self) -> GlSettings {
        GlSettings {
            vsync: self.render.vsync,
        }
    }
}

/// Missing file means defaults. A file that doesn't parse is reported and ignored.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<AppCfg>(&s) {
            Ok(cfg) => {
                info!("config loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("ignoring {}: {e}", path.display());
                AppCfg::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => AppCfg::default(),
        Err(e) => {
            warn!("cannot read {}: {e}", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: AppCfg = toml::from_str(
            r#"
            [render]
            vsync_mode = "fifo"
            frames_in_flight = 3

            [window]
            title = "bench"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.render.vsync_mode, VsyncMode::Fifo);
        assert_eq!(cfg.render.frames_in_flight, 3);
        assert!(cfg.render.vsync);
        assert_eq!(cfg.render.shader_dir, None);
        assert_eq!(cfg.window.title, "bench");
        assert_eq!(cfg.window.width, 1280);
    }

    #[test]
    fn settings_follow_config() {
        let mut cfg = AppCfg::default();
        cfg.render.clear_color = [1.0, 0.0, 0.0, 1.0];
        cfg.render.frames_in_flight = 0;
        cfg.render.shader_dir = Some(PathBuf::from("spv"));
        let rs = cfg.renderer_settings();
        assert_eq!(rs.frames_in_flight, 1);
        assert_eq!(rs.clear_color, Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(rs.limits.max_quads, 10_000);
        let vk = cfg.vk_settings();
        assert_eq!(vk.vsync_mode, VkVsyncMode::Mailbox);
        assert_eq!(vk.shader_dir.as_deref(), Some(Path::new("spv")));
    }

    #[test]
    fn unknown_vsync_mode_is_rejected() {
        assert!(toml::from_str::<AppCfg>("[render]\nvsync_mode = \"sometimes\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = load_cfg(Path::new("definitely/not/here/quadrant.toml"));
        assert_eq!(cfg, AppCfg::default());
    }
}
