pub mod geometry {
    use glam::IVec3;
    use serde::{Deserialize, Serialize};

    /// 车辆网格顶点。NFM 格式使用整数坐标，内部以 `glam::IVec3` 表示。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Vertex(pub IVec3);

    impl Vertex {
        #[inline]
        pub fn new(x: i32, y: i32, z: i32) -> Self {
            Self(IVec3::new(x, y, z))
        }

        #[inline]
        pub fn x(self) -> i32 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> i32 {
            self.0.y
        }

        #[inline]
        pub fn z(self) -> i32 {
            self.0.z
        }

        #[inline]
        pub fn as_ivec3(self) -> IVec3 {
            self.0
        }
    }

    impl From<IVec3> for Vertex {
        fn from(value: IVec3) -> Self {
            Self(value)
        }
    }
}

pub mod car {
    use std::fmt;
    use std::sync::atomic::{AtomicU64, Ordering};

    use rand::Rng;
    use serde::{Deserialize, Serialize};

    use crate::geometry::Vertex;

    /// RGB 车漆颜色。按通道三元组判等，可作为统计字典的键。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Color {
        pub r: u8,
        pub g: u8,
        pub b: u8,
    }

    impl Color {
        #[inline]
        pub fn new(r: u8, g: u8, b: u8) -> Self {
            Self { r, g, b }
        }
    }

    impl fmt::Display for Color {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{},{},{}", self.r, self.g, self.b)
        }
    }

    /// 多边形组的稳定标识，用于多边形回指所属组。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct GroupId(u64);

    impl GroupId {
        fn next() -> Self {
            static NEXT: AtomicU64 = AtomicU64::new(1);
            Self(NEXT.fetch_add(1, Ordering::Relaxed))
        }

        /// 提供原始数值，便于日志输出。
        #[inline]
        pub fn get(self) -> u64 {
            self.0
        }
    }

    /// 组模式决定多边形标记风格与序列化时的外层包裹。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum PolyGroupMode {
        Normal,
        DragShotWheel,
        PhyrexianWheel,
    }

    impl PolyGroupMode {
        /// 按历史别名解析模式（大小写不敏感）。
        pub fn from_alias(value: &str) -> Option<Self> {
            let lowered = value.trim().to_ascii_lowercase();
            match lowered.as_str() {
                "normal" | "n" => Some(Self::Normal),
                "dragshotwheel" | "dsw" | "dscw" | "ds-cw" | "ds" | "ds-w" => {
                    Some(Self::DragShotWheel)
                }
                "phyrexianwheel" | "phy" | "phycw" | "phy-cw" | "phyw" | "phy-w" => {
                    Some(Self::PhyrexianWheel)
                }
                _ => None,
            }
        }
    }

    impl fmt::Display for PolyGroupMode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let label = match self {
                Self::Normal => "Normal",
                Self::DragShotWheel => "DragShotWheel",
                Self::PhyrexianWheel => "PhyrexianWheel",
            };
            f.write_str(label)
        }
    }

    /// 单个多边形：颜色、属性、顶点与未识别的原文行。
    /// `group` 是指回所属组的弱引用，由组在增删时负责修正。
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct Polygon {
        pub no_outline: bool,
        pub color: Color,
        pub fs: Option<i32>,
        pub gr: i32,
        pub vertices: Vec<Vertex>,
        pub metadata: Vec<String>,
        pub alternative_markup: bool,
        #[serde(skip)]
        group: Option<GroupId>,
    }

    impl Polygon {
        pub fn new() -> Self {
            Self::default()
        }

        /// 所属组的标识；尚未归属任何组时为 `None`。
        #[inline]
        pub fn group(&self) -> Option<GroupId> {
            self.group
        }
    }

    /// 命名的多边形集合。组是多边形的唯一所有者，
    /// 多边形列表只能通过组上的方法增删，以保证回指一致。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PolyGroup {
        id: GroupId,
        pub name: String,
        mode: PolyGroupMode,
        pub phyrexian_wheel_index: i32,
        polygons: Vec<Polygon>,
    }

    impl PolyGroup {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                id: GroupId::next(),
                name: name.into(),
                mode: PolyGroupMode::Normal,
                phyrexian_wheel_index: 0,
                polygons: Vec::new(),
            }
        }

        #[inline]
        pub fn id(&self) -> GroupId {
            self.id
        }

        #[inline]
        pub fn mode(&self) -> PolyGroupMode {
            self.mode
        }

        /// 切换组模式。模式决定多边形的规范标记风格，
        /// 因此切换时同步修正组内所有多边形的 `alternative_markup`：
        /// Normal 强制标准标记，PhyrexianWheel 强制替代标记，
        /// DragShotWheel 保持原样。
        pub fn set_mode(&mut self, mode: PolyGroupMode) {
            if self.mode == mode {
                return;
            }
            self.mode = mode;
            let forced = match mode {
                PolyGroupMode::Normal => Some(false),
                PolyGroupMode::DragShotWheel => None,
                PolyGroupMode::PhyrexianWheel => Some(true),
            };
            if let Some(alternative) = forced {
                for polygon in &mut self.polygons {
                    polygon.alternative_markup = alternative;
                }
            }
        }

        #[inline]
        pub fn polygons(&self) -> &[Polygon] {
            &self.polygons
        }

        /// 可变切片：允许修改既有多边形，但不允许增删（增删需经组方法）。
        #[inline]
        pub fn polygons_mut(&mut self) -> &mut [Polygon] {
            &mut self.polygons
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.polygons.len()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.polygons.is_empty()
        }

        /// 追加多边形并修正其回指。
        pub fn add_polygon(&mut self, mut polygon: Polygon) {
            polygon.group = Some(self.id);
            self.polygons.push(polygon);
        }

        pub fn add_polygons(&mut self, polygons: impl IntoIterator<Item = Polygon>) {
            for polygon in polygons {
                self.add_polygon(polygon);
            }
        }

        /// 按下标移除多边形。被移除者的回指若仍指向本组则清空。
        pub fn remove_polygon(&mut self, index: usize) -> Option<Polygon> {
            if index >= self.polygons.len() {
                return None;
            }
            let mut polygon = self.polygons.remove(index);
            if polygon.group == Some(self.id) {
                polygon.group = None;
            }
            Some(polygon)
        }

        /// 取出 `[start, start + count)` 范围内的多边形并清空回指。
        /// 调用方负责保证范围合法。
        pub fn drain_range(&mut self, start: usize, count: usize) -> Vec<Polygon> {
            let mut drained: Vec<Polygon> = self.polygons.drain(start..start + count).collect();
            for polygon in &mut drained {
                if polygon.group == Some(self.id) {
                    polygon.group = None;
                }
            }
            drained
        }

        /// 将组内所有多边形统一设为指定颜色。
        pub fn set_color(&mut self, color: Color) {
            for polygon in &mut self.polygons {
                polygon.color = color;
            }
        }
    }

    /// 生成 8 位随机大写字母组名，用于未命名的组。
    pub fn random_group_name() -> String {
        let mut rng = rand::thread_rng();
        (0..8).map(|_| rng.gen_range(b'A'..=b'Z') as char).collect()
    }

    /// 轮子放置实例。`can_steer` 在文本中写作 `11`/`0`。
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct WheelInstance {
        pub x: i32,
        pub y: i32,
        pub z: i32,
        pub can_steer: bool,
        pub width: i32,
        pub height: i32,
    }

    /// 传动/轮毂记录及其放置实例列表。
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct Wheel {
        pub gw_gr: i32,
        pub rims_color: Color,
        pub rim_size: i32,
        pub rim_depth: i32,
        pub instances: Vec<WheelInstance>,
    }

    /// DragShot 轮的全局半径/深度定义，仅在序列化 DragShotWheel
    /// 模式的组时作为外层包裹输出。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct DragShotWheelDefinition {
        pub radius: i32,
        pub depth: i32,
    }

    impl Default for DragShotWheelDefinition {
        fn default() -> Self {
            Self {
                radius: 53,
                depth: 40,
            }
        }
    }

    /// 一辆车的完整模型：车漆、组、轮子与自由浮动的原文行。
    /// 整个图由解码器或编辑命令构建，加载新车时整体替换。
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct Car {
        pub first_color: Option<Color>,
        pub second_color: Option<Color>,
        pub metadata: Vec<String>,
        pub poly_groups: Vec<PolyGroup>,
        pub wheels: Vec<Wheel>,
        pub drag_shot_wheel: DragShotWheelDefinition,
    }

    impl Car {
        pub fn new() -> Self {
            Self::default()
        }

        /// 全车多边形总数。
        pub fn polygon_count(&self) -> usize {
            self.poly_groups.iter().map(PolyGroup::len).sum()
        }
    }

}
