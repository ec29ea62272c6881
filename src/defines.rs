//! The define table and the adapter-derived platform defines.

use std::collections::BTreeSet;

/// Ordered set of `#define NAME VALUE` lines, prepended verbatim to every source
/// before expansion.
///
/// Entries are compared as whole strings: inserting the same line twice is a no-op,
/// but `FOO 1` and `FOO 2` are distinct entries and both end up in the block.
/// The later one in table order wins during expansion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DefineTable {
    entries: BTreeSet<String>,
}

impl DefineTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if this exact definition was already present.
    pub fn insert(&mut self, name: &str, value: &str) -> bool {
        self.entries.insert(format!("#define {} {}", name, value))
    }

    /// Remove the first definition (in table order) of the macro `name`.
    pub fn remove(&mut self, name: &str) -> bool {
        let found = self
            .entries
            .iter()
            .find(|entry| define_name(entry) == Some(name))
            .cloned();

        match found {
            Some(entry) => self.entries.remove(&entry),
            None => false,
        }
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| define_name(entry) == Some(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One definition per line, each terminated by a newline.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(entry);
            out.push('\n');
        }
        out
    }
}

/// Macro name of a `#define` line; stops at the parameter list or the first space.
fn define_name(entry: &str) -> Option<&str> {
    let rest = entry.strip_prefix("#define")?.trim_start();
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    Some(&rest[..end]).filter(|name| !name.is_empty())
}

/// `WGPUAdapterType` numbering from the WebGPU C API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdapterType {
    DiscreteGpu = 1,
    IntegratedGpu = 2,
    Cpu = 3,
    Unknown = 4,
}

/// `WGPUBackendType` numbering from the WebGPU C API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BackendType {
    Undefined = 0,
    Null = 1,
    WebGpu = 2,
    D3D11 = 3,
    D3D12 = 4,
    Metal = 5,
    Vulkan = 6,
    OpenGl = 7,
    OpenGlEs = 8,
}

/// Light kinds shader code can branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LightType {
    Directional = 0,
    Point = 1,
    Spot = 2,
}

/// Identifying facts about the GPU adapter a shader is compiled for.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdapterInfo {
    pub vendor: String,
    pub vendor_id: u32,
    pub architecture: String,
    pub device: String,
    pub device_id: u32,
    pub description: String,
    pub adapter_type: AdapterType,
    pub backend_type: BackendType,
}

/// Anything that can describe an adapter: a plain [`AdapterInfo`], or with the
/// `wgpu` feature, a `wgpu::Adapter`.
pub trait AdapterInfoSource {
    fn adapter_info(&self) -> AdapterInfo;
}

impl AdapterInfoSource for AdapterInfo {
    fn adapter_info(&self) -> AdapterInfo {
        self.clone()
    }
}

/// Name/value pairs injected by `initialize_platform_defines`.
pub fn platform_defines(info: &AdapterInfo) -> Vec<(&'static str, String)> {
    let mut defines = vec![
        ("WGPU_VENDOR", quote(&info.vendor)),
        ("WGPU_VENDOR_ID", info.vendor_id.to_string()),
        ("WGPU_ARCHITECTURE", quote(&info.architecture)),
        ("WGPU_DEVICE", quote(&info.device)),
        ("WGPU_DEVICE_ID", info.device_id.to_string()),
        ("WGPU_DESCRIPTION", quote(&info.description)),
        ("WGPU_ADAPTER_TYPE", (info.adapter_type as u32).to_string()),
        ("WGPU_BACKEND_TYPE", (info.backend_type as u32).to_string()),
    ];

    let constants: [(&'static str, u32); 13] = [
        ("WGPU_ADAPTER_TYPE_DISCRETE_GPU", AdapterType::DiscreteGpu as u32),
        ("WGPU_ADAPTER_TYPE_INTEGRATED_GPU", AdapterType::IntegratedGpu as u32),
        ("WGPU_ADAPTER_TYPE_CPU", AdapterType::Cpu as u32),
        ("WGPU_BACKEND_TYPE_WEBGPU", BackendType::WebGpu as u32),
        ("WGPU_BACKEND_TYPE_D3D11", BackendType::D3D11 as u32),
        ("WGPU_BACKEND_TYPE_D3D12", BackendType::D3D12 as u32),
        ("WGPU_BACKEND_TYPE_METAL", BackendType::Metal as u32),
        ("WGPU_BACKEND_TYPE_VULKAN", BackendType::Vulkan as u32),
        ("WGPU_BACKEND_TYPE_OPENGL", BackendType::OpenGl as u32),
        ("WGPU_BACKEND_TYPE_OPENGLES", BackendType::OpenGlEs as u32),
        ("WAYLIB_LIGHT_TYPE_DIRECTIONAL", LightType::Directional as u32),
        ("WAYLIB_LIGHT_TYPE_POINT", LightType::Point as u32),
        ("WAYLIB_LIGHT_TYPE_SPOT", LightType::Spot as u32),
    ];

    defines.extend(
        constants
            .iter()
            .map(|&(name, value)| (name, value.to_string())),
    );
    defines
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(feature = "wgpu")]
mod wgpu_support {
    use super::{AdapterInfo, AdapterInfoSource, AdapterType, BackendType};

    fn vendor_name(vendor_id: u32) -> &'static str {
        match vendor_id {
            0x1002 => "amd",
            0x10de => "nvidia",
            0x8086 => "intel",
            0x106b => "apple",
            0x13b5 => "arm",
            0x5143 => "qualcomm",
            0x1010 => "imagination",
            _ => "",
        }
    }

    fn adapter_type(device_type: wgpu::DeviceType) -> AdapterType {
        match device_type {
            wgpu::DeviceType::DiscreteGpu => AdapterType::DiscreteGpu,
            wgpu::DeviceType::IntegratedGpu => AdapterType::IntegratedGpu,
            wgpu::DeviceType::Cpu => AdapterType::Cpu,
            _ => AdapterType::Unknown,
        }
    }

    fn backend_type(backend: wgpu::Backend) -> BackendType {
        match backend {
            wgpu::Backend::Vulkan => BackendType::Vulkan,
            wgpu::Backend::Metal => BackendType::Metal,
            wgpu::Backend::Dx12 => BackendType::D3D12,
            wgpu::Backend::Gl => BackendType::OpenGlEs,
            wgpu::Backend::BrowserWebGpu => BackendType::WebGpu,
            _ => BackendType::Null,
        }
    }

    /// The fields of `wgpu::AdapterInfo` that carry over, taken one by one.
    fn from_parts(
        name: &str,
        vendor_id: u32,
        device_id: u32,
        device_type: wgpu::DeviceType,
        driver: &str,
        driver_info: &str,
        backend: wgpu::Backend,
    ) -> AdapterInfo {
        AdapterInfo {
            vendor: vendor_name(vendor_id).to_owned(),
            vendor_id,
            architecture: String::new(),
            device: name.to_owned(),
            device_id,
            description: format!("{} {}", driver, driver_info).trim().to_owned(),
            adapter_type: adapter_type(device_type),
            backend_type: backend_type(backend),
        }
    }

    impl From<&wgpu::AdapterInfo> for AdapterInfo {
        fn from(info: &wgpu::AdapterInfo) -> Self {
            from_parts(
                &info.name,
                info.vendor,
                info.device,
                info.device_type,
                &info.driver,
                &info.driver_info,
                info.backend,
            )
        }
    }

    impl AdapterInfoSource for wgpu::AdapterInfo {
        fn adapter_info(&self) -> AdapterInfo {
            AdapterInfo::from(self)
        }
    }

    impl AdapterInfoSource for wgpu::Adapter {
        fn adapter_info(&self) -> AdapterInfo {
            AdapterInfo::from(&self.get_info())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn discrete_vulkan_adapter() {
            let info = from_parts(
                "GeForce RTX 4070",
                0x10de,
                0x2786,
                wgpu::DeviceType::DiscreteGpu,
                "NVIDIA",
                "550.54",
                wgpu::Backend::Vulkan,
            );

            assert_eq!(
                info,
                AdapterInfo {
                    vendor: "nvidia".to_owned(),
                    vendor_id: 0x10de,
                    architecture: String::new(),
                    device: "GeForce RTX 4070".to_owned(),
                    device_id: 0x2786,
                    description: "NVIDIA 550.54".to_owned(),
                    adapter_type: AdapterType::DiscreteGpu,
                    backend_type: BackendType::Vulkan,
                }
            );
        }

        #[test]
        fn gl_and_unknown_devices() {
            let info = from_parts(
                "llvmpipe",
                0xffff,
                0,
                wgpu::DeviceType::Other,
                "",
                "",
                wgpu::Backend::Gl,
            );

            assert_eq!(info.vendor, "");
            assert_eq!(info.description, "");
            assert_eq!(info.adapter_type, AdapterType::Unknown);
            assert_eq!(info.backend_type, BackendType::OpenGlEs);
        }

        #[test]
        fn type_mapping() {
            assert_eq!(adapter_type(wgpu::DeviceType::IntegratedGpu), AdapterType::IntegratedGpu);
            assert_eq!(adapter_type(wgpu::DeviceType::Cpu), AdapterType::Cpu);
            assert_eq!(adapter_type(wgpu::DeviceType::VirtualGpu), AdapterType::Unknown);

            assert_eq!(backend_type(wgpu::Backend::Metal), BackendType::Metal);
            assert_eq!(backend_type(wgpu::Backend::Dx12), BackendType::D3D12);
            assert_eq!(backend_type(wgpu::Backend::BrowserWebGpu), BackendType::WebGpu);
            assert_eq!(backend_type(wgpu::Backend::Noop), BackendType::Null);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_semantics() {
        let mut table = DefineTable::new();
        assert!(table.insert("FOO", "1"));
        assert!(!table.insert("FOO", "1"));
        assert_eq!(table.iter().collect::<Vec<_>>(), vec!["#define FOO 1"]);

        assert!(table.insert("FOO", "2"));
        assert_eq!(
            table.iter().collect::<Vec<_>>(),
            vec!["#define FOO 1", "#define FOO 2"]
        );
        assert_eq!(table.to_text(), "#define FOO 1\n#define FOO 2\n");
    }

    #[test]
    fn remove_matches_names_exactly() {
        let mut table = DefineTable::new();
        table.insert("FOO_BAR", "1");
        table.insert("FOO", "2");
        table.insert("MAX(a, b)", "((a) > (b) ? (a) : (b))");

        assert!(table.remove("FOO"));
        assert!(table.contains_name("FOO_BAR"));
        assert!(!table.contains_name("FOO"));
        assert!(!table.remove("FOO"));
        assert!(!table.remove("BAR"));

        assert!(table.contains_name("MAX"));
        assert!(table.remove("MAX"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn platform_define_values() {
        let info = AdapterInfo {
            vendor: "nvidia".to_owned(),
            vendor_id: 0x10de,
            architecture: "ampere".to_owned(),
            device: "Say \"cheese\"".to_owned(),
            device_id: 42,
            description: String::new(),
            adapter_type: AdapterType::DiscreteGpu,
            backend_type: BackendType::Vulkan,
        };

        let defines = platform_defines(&info);
        let get = |name: &str| {
            defines
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("WGPU_VENDOR"), Some("\"nvidia\""));
        assert_eq!(get("WGPU_VENDOR_ID"), Some("4318"));
        assert_eq!(get("WGPU_DEVICE"), Some("\"Say \\\"cheese\\\"\""));
        assert_eq!(get("WGPU_DESCRIPTION"), Some("\"\""));
        assert_eq!(get("WGPU_ADAPTER_TYPE"), Some("1"));
        assert_eq!(get("WGPU_BACKEND_TYPE"), Some("6"));
        assert_eq!(get("WGPU_BACKEND_TYPE_VULKAN"), Some("6"));
        assert_eq!(get("WGPU_ADAPTER_TYPE_CPU"), Some("3"));
        assert_eq!(get("WAYLIB_LIGHT_TYPE_SPOT"), Some("2"));
    }
}
