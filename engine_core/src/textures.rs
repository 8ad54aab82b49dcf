use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use crate::logging;

pub const DEFAULT_TEXTURE_NAME: &str = "default";
const CHECKER_SIZE: u32 = 64;
const CHECKER_CELL: u32 = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Texture {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub rgba: Arc<Vec<u8>>,
}

impl Texture {
    /// Magenta/black checker used when no `default` asset exists on disk.
    pub fn checker(name: &str) -> Self {
        let mut rgba = Vec::with_capacity((CHECKER_SIZE * CHECKER_SIZE * 4) as usize);
        for y in 0..CHECKER_SIZE {
            for x in 0..CHECKER_SIZE {
                let lit = ((x / CHECKER_CELL) + (y / CHECKER_CELL)) % 2 == 0;
                if lit {
                    rgba.extend_from_slice(&[255, 0, 255, 255]);
                } else {
                    rgba.extend_from_slice(&[0, 0, 0, 255]);
                }
            }
        }
        Self {
            name: name.to_string(),
            width: CHECKER_SIZE,
            height: CHECKER_SIZE,
            rgba: Arc::new(rgba),
        }
    }
}

/// Where texture bytes come from. The manager owns caching and fallback; sources only load.
pub trait TextureSource {
    fn load(&self, name: &str) -> Result<Texture, String>;
}

/// Resolves `<root>/<name>.<extension>` and decodes it as png.
#[derive(Clone, Debug)]
pub struct DirTextureSource {
    pub root: PathBuf,
    pub extension: String,
}

impl DirTextureSource {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", name, self.extension.trim_start_matches('.')))
    }
}

impl TextureSource for DirTextureSource {
    fn load(&self, name: &str) -> Result<Texture, String> {
        if name.is_empty() || name.contains("..") {
            return Err(format!("invalid texture name '{}'", name));
        }
        let path = self.path_for(name);
        let bytes = std::fs::read(&path)
            .map_err(|err| format!("read {} failed: {}", path.display(), err))?;
        let (width, height, rgba) = decode_png(bytes)?;
        Ok(Texture {
            name: name.to_string(),
            width,
            height,
            rgba: Arc::new(rgba),
        })
    }
}

/// Sole owner of loaded textures, keyed by name for the lifetime of the manager.
pub struct TextureManager<S> {
    source: S,
    loaded: BTreeMap<String, Texture>,
    missing: BTreeSet<String>,
}

impl<S: TextureSource> TextureManager<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            loaded: BTreeMap::new(),
            missing: BTreeSet::new(),
        }
    }

    /// Returns the cached texture, loads it, or falls back to `default`.
    /// The returned texture's `name` tells the caller which batch it resolved to.
    pub fn load_by_name(&mut self, name: &str) -> Texture {
        if let Some(texture) = self.loaded.get(name) {
            return texture.clone();
        }
        if !self.missing.contains(name) {
            match self.source.load(name) {
                Ok(texture) => {
                    logging::debug(format!(
                        "texture '{}' loaded ({}x{})",
                        name, texture.width, texture.height
                    ));
                    self.loaded.insert(name.to_string(), texture.clone());
                    return texture;
                }
                Err(err) => {
                    logging::warn(format!(
                        "texture '{}' unavailable, using '{}': {}",
                        name, DEFAULT_TEXTURE_NAME, err
                    ));
                    self.missing.insert(name.to_string());
                }
            }
        }
        self.default_texture()
    }

    pub fn default_texture(&mut self) -> Texture {
        if let Some(texture) = self.loaded.get(DEFAULT_TEXTURE_NAME) {
            return texture.clone();
        }
        let texture = match self.source.load(DEFAULT_TEXTURE_NAME) {
            Ok(texture) => texture,
            Err(err) => {
                logging::warn(format!(
                    "default texture unavailable, using built-in checker: {}",
                    err
                ));
                Texture::checker(DEFAULT_TEXTURE_NAME)
            }
        };
        self.loaded
            .insert(DEFAULT_TEXTURE_NAME.to_string(), texture.clone());
        texture
    }

    pub fn get(&self, name: &str) -> Option<&Texture> {
        self.loaded.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }

    pub fn is_missing(&self, name: &str) -> bool {
        self.missing.contains(name)
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.loaded.keys().map(String::as_str)
    }

    /// Drops every cached texture and forgets failed lookups. Returns how many were released.
    pub fn release_all(&mut self) -> usize {
        let count = self.loaded.len();
        for name in self.loaded.keys() {
            logging::debug(format!("texture '{}' released", name));
        }
        self.loaded.clear();
        self.missing.clear();
        count
    }
}

fn decode_png(bytes: Vec<u8>) -> Result<(u32, u32, Vec<u8>), String> {
    let decoder = png::Decoder::new(Cursor::new(bytes));
    let mut reader = decoder.read_info().map_err(|err| err.to_string())?;
    if reader.info().bit_depth != png::BitDepth::Eight {
        return Err("png bit depth must be 8".to_string());
    }
    let mut buf = vec![0; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buf).map_err(|err| err.to_string())?;
    let bytes = &buf[..frame.buffer_size()];
    let pixels = frame.width as usize * frame.height as usize;
    let rgba = match frame.color_type {
        png::ColorType::Rgba => bytes.to_vec(),
        png::ColorType::Rgb => {
            let mut out = Vec::with_capacity(pixels * 4);
            for px in bytes.chunks_exact(3) {
                out.extend_from_slice(&[px[0], px[1], px[2], 255]);
            }
            out
        }
        png::ColorType::Grayscale => {
            let mut out = Vec::with_capacity(pixels * 4);
            for value in bytes {
                out.extend_from_slice(&[*value, *value, *value, 255]);
            }
            out
        }
        png::ColorType::GrayscaleAlpha => {
            let mut out = Vec::with_capacity(pixels * 4);
            for px in bytes.chunks_exact(2) {
                out.extend_from_slice(&[px[0], px[0], px[0], px[1]]);
            }
            out
        }
        other => return Err(format!("unsupported png color type {:?}", other)),
    };
    Ok((frame.width, frame.height, rgba))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    struct MemorySource {
        textures: HashMap<String, (u32, u32)>,
        calls: RefCell<Vec<String>>,
    }

    impl MemorySource {
        fn new(entries: &[(&str, u32, u32)]) -> Self {
            Self {
                textures: entries
                    .iter()
                    .map(|(name, w, h)| (name.to_string(), (*w, *h)))
                    .collect(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl TextureSource for MemorySource {
        fn load(&self, name: &str) -> Result<Texture, String> {
            self.calls.borrow_mut().push(name.to_string());
            let (width, height) = self
                .textures
                .get(name)
                .copied()
                .ok_or_else(|| format!("no texture {}", name))?;
            Ok(Texture {
                name: name.to_string(),
                width,
                height,
                rgba: Arc::new(vec![0; (width * height * 4) as usize]),
            })
        }
    }

    fn temp_dir(label: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = std::env::temp_dir().join(format!("engine_core_{}_{}", label, stamp));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn write_png(path: &std::path::Path, width: u32, height: u32) {
        let file = std::fs::File::create(path).expect("create png");
        let mut encoder = png::Encoder::new(std::io::BufWriter::new(file), width, height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().expect("png header");
        let data = vec![128u8; (width * height * 3) as usize];
        writer.write_image_data(&data).expect("png data");
    }

    #[test]
    fn caches_loaded_textures_by_name() {
        let mut manager = TextureManager::new(MemorySource::new(&[("brick", 128, 64)]));
        let first = manager.load_by_name("brick");
        let second = manager.load_by_name("brick");
        assert_eq!(first.name, "brick");
        assert_eq!((second.width, second.height), (128, 64));
        assert_eq!(manager.source.calls.borrow().len(), 1);
    }

    #[test]
    fn missing_texture_resolves_to_default() {
        let mut manager = TextureManager::new(MemorySource::new(&[("default", 32, 32)]));
        let texture = manager.load_by_name("nonexistent");
        assert_eq!(texture.name, DEFAULT_TEXTURE_NAME);
        assert_eq!(texture.width, 32);
        assert!(manager.is_missing("nonexistent"));
        manager.load_by_name("nonexistent");
        let tries = manager
            .source
            .calls
            .borrow()
            .iter()
            .filter(|name| name.as_str() == "nonexistent")
            .count();
        assert_eq!(tries, 1);
    }

    #[test]
    fn builtin_checker_when_default_is_absent() {
        let mut manager = TextureManager::new(MemorySource::new(&[]));
        let texture = manager.load_by_name("anything");
        assert_eq!(texture.name, DEFAULT_TEXTURE_NAME);
        assert_eq!(texture.width, CHECKER_SIZE);
        assert_eq!(texture.rgba.len(), (CHECKER_SIZE * CHECKER_SIZE * 4) as usize);
        assert!(manager.contains(DEFAULT_TEXTURE_NAME));
    }

    #[test]
    fn release_all_clears_cache() {
        let mut manager =
            TextureManager::new(MemorySource::new(&[("a", 1, 1), ("b", 2, 2)]));
        manager.load_by_name("a");
        manager.load_by_name("b");
        manager.load_by_name("c");
        assert_eq!(manager.release_all(), 3);
        assert!(manager.is_empty());
        assert!(!manager.is_missing("c"));
    }

    #[test]
    fn dir_source_decodes_rgb_png() {
        let dir = temp_dir("textures");
        write_png(&dir.join("stone.png"), 4, 2);
        let source = DirTextureSource::new(&dir, "png");
        let texture = source.load("stone").expect("load stone");
        assert_eq!((texture.width, texture.height), (4, 2));
        assert_eq!(texture.rgba.len(), 4 * 2 * 4);
        assert_eq!(&texture.rgba[..4], &[128, 128, 128, 255]);
        assert!(source.load("absent").is_err());
        assert!(source.load("../stone").is_err());
        let _ = std::fs::remove_dir_all(dir);
    }
}
