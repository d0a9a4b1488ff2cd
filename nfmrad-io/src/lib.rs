use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use thiserror::Error;

use nfmrad_core::car::{
    Car, Color, DragShotWheelDefinition, PolyGroup, PolyGroupMode, Polygon, Wheel, WheelInstance,
    random_group_name,
};
use nfmrad_core::geometry::Vertex;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// 解码失败的分类。所有变体都是致命的：解析整体中止，不产生部分模型。
#[derive(Debug, Error)]
pub enum DecodeError {
    /// 内容行要求某个未打开的组/多边形/轮子（或标签本身残缺）。
    #[error("第 {line} 行存在结构错误：{content}")]
    Structure { line: usize, content: String },
    /// 非空数值段无法解析为整数。
    #[error("第 {line} 行的数值字段无法解析：{content}")]
    Numeric { line: usize, content: String },
    /// 可识别但尚未实现的标记。
    #[error("第 {line} 行使用了尚未支持的标记：{content}")]
    Unsupported { line: usize, content: String },
}

pub trait CarLoader {
    fn load(&self, path: &Path) -> Result<Option<Car>, IoError>;
}

pub trait CarSaver {
    fn save(&self, car: &Car, path: &Path) -> Result<(), IoError>;
}

pub struct RadFacade;

impl RadFacade {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RadFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl CarLoader for RadFacade {
    fn load(&self, path: &Path) -> Result<Option<Car>, IoError> {
        let data = fs::read_to_string(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(decode(&data)?)
    }
}

impl CarSaver for RadFacade {
    fn save(&self, car: &Car, path: &Path) -> Result<(), IoError> {
        fs::write(path, encode(car)).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// 解码车辆文本。空白输入按约定返回 `Ok(None)`（“没有车”），
/// 调用方应将其视为加载失败而非格式错误。
pub fn decode(source: &str) -> Result<Option<Car>, DecodeError> {
    if source.trim().is_empty() {
        return Ok(None);
    }
    CarParser::new(source).parse().map(Some)
}

/// 将模型序列化为规范文本。总是成功，输出只依赖模型状态。
pub fn encode(car: &Car) -> String {
    let mut out = String::new();
    if let Some(color) = car.first_color {
        out.push_str(&format!("1stColor({color})\n"));
    }
    if let Some(color) = car.second_color {
        out.push_str(&format!("2ndColor({color})\n"));
    }

    for group in mode_groups(car, PolyGroupMode::Normal) {
        write_group(&mut out, group);
    }

    let drag_shot: Vec<&PolyGroup> = mode_groups(car, PolyGroupMode::DragShotWheel).collect();
    if !drag_shot.is_empty() {
        let definition = car.drag_shot_wheel;
        out.push_str(&format!(
            "<wheel radius=\"{}\" depth=\"{}\">\n",
            definition.radius, definition.depth
        ));
        for group in drag_shot {
            write_group(&mut out, group);
        }
        out.push_str("</wheel>\n");
    }

    for line in &car.metadata {
        out.push_str(line);
        out.push('\n');
    }

    let has_phy_wheels = car
        .poly_groups
        .iter()
        .any(|g| g.mode() == PolyGroupMode::PhyrexianWheel);
    for wheel in &car.wheels {
        write_wheel(&mut out, wheel);
        if has_phy_wheels {
            out.push_str("c\n");
        }
        out.push('\n');
    }

    if has_phy_wheels {
        let mut buckets: BTreeMap<i32, Vec<&PolyGroup>> = BTreeMap::new();
        for group in mode_groups(car, PolyGroupMode::PhyrexianWheel) {
            buckets
                .entry(group.phyrexian_wheel_index)
                .or_default()
                .push(group);
        }
        for (index, groups) in buckets {
            out.push_str(&format!("<phy-wheel-{index}>\n"));
            for group in groups {
                write_group(&mut out, group);
            }
            out.push_str(&format!("</phy-wheel-{index}>\n"));
        }
    }

    out
}

fn mode_groups(car: &Car, mode: PolyGroupMode) -> impl Iterator<Item = &PolyGroup> {
    car.poly_groups.iter().filter(move |g| g.mode() == mode)
}

fn write_group(out: &mut String, group: &PolyGroup) {
    let named = !group.name.trim().is_empty();
    if named {
        out.push_str(&format!("<g={}>\n", group.name));
    }
    for polygon in group.polygons() {
        write_polygon(out, polygon);
    }
    if named {
        out.push_str(&format!("</g={}>\n", group.name));
    }
    out.push('\n');
}

fn write_polygon(out: &mut String, polygon: &Polygon) {
    let (open, close) = if polygon.alternative_markup {
        ("[p]", "[/p]")
    } else {
        ("<p>", "</p>")
    };
    out.push_str(open);
    out.push('\n');
    if polygon.no_outline {
        out.push_str("noOutline\n");
    }
    out.push_str(&format!("c({})\n", polygon.color));
    if let Some(fs) = polygon.fs {
        out.push_str(&format!("fs({fs})\n"));
    }
    if polygon.gr != 0 {
        out.push_str(&format!("gr({})\n", polygon.gr));
    }
    for line in &polygon.metadata {
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    for vertex in &polygon.vertices {
        out.push_str(&format!("p({},{},{})\n", vertex.x(), vertex.y(), vertex.z()));
    }
    out.push_str(close);
    out.push('\n');
    out.push('\n');
}

fn write_wheel(out: &mut String, wheel: &Wheel) {
    out.push_str(&format!("gwgr({})\n", wheel.gw_gr));
    out.push_str(&format!(
        "rims({},{},{})\n",
        wheel.rims_color, wheel.rim_size, wheel.rim_depth
    ));
    for instance in &wheel.instances {
        let steer = if instance.can_steer { "11" } else { "0" };
        out.push_str(&format!(
            "w({},{},{},{},{},{})\n",
            instance.x, instance.y, instance.z, steer, instance.width, instance.height
        ));
    }
}

/// 按换行拆分借用文本的前向游标。不分配，记录行号与最近一次
/// 读取的切片，供错误信息定位。
struct LineCursor<'a> {
    source: &'a str,
    current: usize,
    line: usize,
    last_start: usize,
    last_len: usize,
}

impl<'a> LineCursor<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            current: 0,
            line: 0,
            last_start: 0,
            last_len: 0,
        }
    }

    #[inline]
    fn at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    /// 读取下一行（不含结尾 `\n`，不剥离 `\r`，调用方自行修剪）。
    /// 已到末尾时返回空串且状态不变。
    fn read_line(&mut self) -> &'a str {
        if self.at_end() {
            return "";
        }
        let rest = &self.source[self.current..];
        let len = rest.find('\n').unwrap_or(rest.len());
        let slice = &rest[..len];
        self.last_start = self.current;
        self.last_len = len;
        self.current += len + 1;
        self.line += 1;
        slice
    }

    #[inline]
    fn line(&self) -> usize {
        self.line
    }

    /// 最近一次读到的原始行，供诊断输出。
    fn last_read_line(&self) -> &'a str {
        &self.source[self.last_start..self.last_start + self.last_len]
    }
}

/// 从 `start` 起连续的数值字符（ASCII 数字与 `-`）长度。
/// 越界或空行返回 0。语法中每个字段的边界要么是字面分隔符，
/// 要么是数值串的结束，这一个原语覆盖全部字段。
fn numeric_run_length(line: &str, start: usize) -> usize {
    let bytes = line.as_bytes();
    if start >= bytes.len() {
        return 0;
    }
    bytes[start..]
        .iter()
        .take_while(|&&b| b.is_ascii_digit() || b == b'-')
        .count()
}

#[inline]
fn numeric_run(line: &str, start: usize) -> &str {
    let len = numeric_run_length(line, start);
    &line[start..start + len]
}

/// 沿逗号分隔的字段序列前进。首个字段取自切片开头，
/// 之后每次先跳到下一个逗号再取数值串；找不到逗号时从
/// 当前切片开头重读（与历史实现的越界退化行为一致）。
struct FieldWalk<'a> {
    rest: &'a str,
    first: bool,
}

impl<'a> FieldWalk<'a> {
    fn new(rest: &'a str) -> Self {
        Self { rest, first: true }
    }

    fn take(&mut self) -> &'a str {
        if self.first {
            self.first = false;
            return numeric_run(self.rest, 0);
        }
        let at = self.rest.find(',').map(|i| i + 1).unwrap_or(0);
        self.rest = &self.rest[at..];
        numeric_run(self.rest, 0)
    }
}

/// 按前缀优先级给行打标签。只分类不求值，
/// 使状态机的转移表可以独立于副作用测试。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Comment,
    PolyOpen { alternative: bool },
    PolyClose,
    GroupOpen,
    GroupClose,
    PolyColor,
    PolyVertex,
    PolyFs,
    PolyGr,
    NoOutline,
    FirstColor,
    SecondColor,
    DragShotOpen,
    DragShotClose,
    PhyWheelRef,
    PhyOpen,
    PhyClose,
    WheelStart,
    WheelRims,
    WheelInstance,
    WheelMarker,
    Other,
}

fn classify(line: &str) -> LineKind {
    if line.starts_with("//") {
        LineKind::Comment
    } else if line.starts_with("<p>") {
        LineKind::PolyOpen { alternative: false }
    } else if line.starts_with("[p]") {
        LineKind::PolyOpen { alternative: true }
    } else if line.starts_with("</p>") || line.starts_with("[/p]") {
        LineKind::PolyClose
    } else if line.starts_with("<g=") {
        LineKind::GroupOpen
    } else if line.starts_with("</g=") {
        LineKind::GroupClose
    } else if line.starts_with("c(") {
        LineKind::PolyColor
    } else if line.starts_with("p(") {
        LineKind::PolyVertex
    } else if line.starts_with("fs(") {
        LineKind::PolyFs
    } else if line.starts_with("gr(") {
        LineKind::PolyGr
    } else if line.starts_with("noOutline") {
        LineKind::NoOutline
    } else if line.starts_with("1stColor(") {
        LineKind::FirstColor
    } else if line.starts_with("2ndColor(") {
        LineKind::SecondColor
    } else if line.starts_with("</wheel>") {
        LineKind::DragShotClose
    } else if line.starts_with("<wheel") {
        LineKind::DragShotOpen
    } else if line.starts_with("wheel(") {
        LineKind::PhyWheelRef
    } else if line.starts_with("<phy-wheel-") {
        LineKind::PhyOpen
    } else if line.starts_with("</phy-wheel-") {
        LineKind::PhyClose
    } else if line.starts_with("gwgr(") {
        LineKind::WheelStart
    } else if line.starts_with("rims(") {
        LineKind::WheelRims
    } else if line.starts_with("w(") {
        LineKind::WheelInstance
    } else if line.trim_end() == "c" {
        LineKind::WheelMarker
    } else {
        LineKind::Other
    }
}

/// 行分派状态机。消费 `LineCursor` 的行，借助数值扫描取字段，
/// 逐行构建模型。
struct CarParser<'a> {
    cursor: LineCursor<'a>,
}

impl<'a> CarParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            cursor: LineCursor::new(source),
        }
    }

    fn parse(mut self) -> Result<Car, DecodeError> {
        let mut car = Car::new();
        let mut mode = PolyGroupMode::Normal;
        let mut group: Option<usize> = None;
        let mut polygon: Option<Polygon> = None;
        let mut wheel: Option<usize> = None;
        let mut phy_index: Option<i32> = None;

        while !self.cursor.at_end() {
            let raw = self.cursor.read_line();
            if raw.trim().is_empty() {
                continue;
            }
            let line = raw.trim_start();

            match classify(line) {
                LineKind::Comment => {}
                LineKind::PolyOpen { alternative } => {
                    if group.is_none() {
                        let mut created = PolyGroup::new(random_group_name());
                        created.set_mode(mode);
                        if mode == PolyGroupMode::PhyrexianWheel {
                            created.phyrexian_wheel_index = phy_index.unwrap_or_default();
                        }
                        car.poly_groups.push(created);
                        group = Some(car.poly_groups.len() - 1);
                    }
                    let mut opened = Polygon::new();
                    opened.alternative_markup = alternative;
                    polygon = Some(opened);
                }
                LineKind::PolyClose => match (group, polygon.take()) {
                    (Some(index), Some(closed)) => {
                        car.poly_groups[index].add_polygon(closed);
                    }
                    _ => return Err(self.structure_error()),
                },
                LineKind::GroupOpen => {
                    let rest = &line["<g=".len()..];
                    let end = rest.find('>').ok_or_else(|| self.structure_error())?;
                    let name = &rest[..end];
                    let mut opened = if name.trim().is_empty() {
                        PolyGroup::new(random_group_name())
                    } else {
                        PolyGroup::new(name)
                    };
                    opened.set_mode(mode);
                    if mode == PolyGroupMode::PhyrexianWheel {
                        opened.phyrexian_wheel_index =
                            phy_index.ok_or_else(|| self.structure_error())?;
                    }
                    car.poly_groups.push(opened);
                    group = Some(car.poly_groups.len() - 1);
                }
                LineKind::GroupClose => {
                    group = None;
                }
                LineKind::PolyColor => {
                    let target = self.open_polygon(group, &mut polygon)?;
                    let mut walk = FieldWalk::new(&line["c(".len()..]);
                    target.color = self.parse_color(&mut walk)?;
                }
                LineKind::PolyVertex => {
                    let target = self.open_polygon(group, &mut polygon)?;
                    let mut walk = FieldWalk::new(&line["p(".len()..]);
                    let x = self.parse_int(walk.take())?;
                    let y = self.parse_int(walk.take())?;
                    let z = self.parse_int(walk.take())?;
                    target.vertices.push(Vertex::new(x, y, z));
                }
                LineKind::PolyFs => {
                    let target = self.open_polygon(group, &mut polygon)?;
                    let value = self.parse_int(numeric_run(line, "fs(".len()))?;
                    target.fs = Some(value);
                }
                LineKind::PolyGr => {
                    let target = self.open_polygon(group, &mut polygon)?;
                    let value = self.parse_int(numeric_run(line, "gr(".len()))?;
                    target.gr = value;
                }
                LineKind::NoOutline => {
                    let target = self.open_polygon(group, &mut polygon)?;
                    target.no_outline = true;
                }
                LineKind::FirstColor => {
                    let mut walk = FieldWalk::new(&line["1stColor(".len()..]);
                    car.first_color = Some(self.parse_color(&mut walk)?);
                }
                LineKind::SecondColor => {
                    let mut walk = FieldWalk::new(&line["2ndColor(".len()..]);
                    car.second_color = Some(self.parse_color(&mut walk)?);
                }
                LineKind::DragShotOpen => {
                    group = None;
                    mode = PolyGroupMode::DragShotWheel;
                    car.drag_shot_wheel =
                        self.parse_drag_shot_attributes(line["<wheel".len()..].trim_start())?;
                }
                LineKind::DragShotClose => {
                    mode = PolyGroupMode::Normal;
                    group = None;
                }
                LineKind::PhyWheelRef => {
                    let group_index = match (group, polygon.as_ref()) {
                        (Some(index), Some(_)) => index,
                        _ => return Err(self.structure_error()),
                    };
                    if car.poly_groups[group_index].mode() != PolyGroupMode::PhyrexianWheel {
                        return Err(self.unsupported_error());
                    }
                    // 已识别的 Phyrexian 轮引用目前直接丢弃。
                }
                LineKind::PhyOpen => {
                    mode = PolyGroupMode::PhyrexianWheel;
                    let index = self.parse_int(numeric_run(line, "<phy-wheel-".len()))?;
                    phy_index = Some(index);
                    group = None;
                }
                LineKind::PhyClose => {
                    mode = PolyGroupMode::Normal;
                    group = None;
                    phy_index = None;
                }
                LineKind::WheelStart => {
                    let gw_gr = self.parse_int(numeric_run(line, "gwgr(".len()))?;
                    car.wheels.push(Wheel {
                        gw_gr,
                        ..Wheel::default()
                    });
                    wheel = Some(car.wheels.len() - 1);
                }
                LineKind::WheelRims => {
                    let index = wheel.ok_or_else(|| self.structure_error())?;
                    let mut walk = FieldWalk::new(&line["rims(".len()..]);
                    let color = self.parse_color(&mut walk)?;
                    let size = self.parse_int(walk.take())?;
                    let depth = self.parse_int(walk.take())?;
                    let target = &mut car.wheels[index];
                    target.rims_color = color;
                    target.rim_size = size;
                    target.rim_depth = depth;
                }
                LineKind::WheelInstance => {
                    let index = wheel.ok_or_else(|| self.structure_error())?;
                    let mut walk = FieldWalk::new(&line["w(".len()..]);
                    let x = self.parse_int(walk.take())?;
                    let y = self.parse_int(walk.take())?;
                    let z = self.parse_int(walk.take())?;
                    let steer = self.parse_int(walk.take())?;
                    let width = self.parse_int(walk.take())?;
                    let height = self.parse_int(walk.take())?;
                    car.wheels[index].instances.push(WheelInstance {
                        x,
                        y,
                        z,
                        can_steer: steer != 0,
                        width,
                        height,
                    });
                }
                LineKind::WheelMarker if wheel.is_some() && polygon.is_none() => {
                    // 轮子块尾部的 Phyrexian 标记字符，由编码器重新生成。
                }
                LineKind::WheelMarker | LineKind::Other => {
                    if group.is_none() || polygon.is_none() {
                        car.metadata.push(line.to_string());
                    } else if let Some(open) = polygon.as_mut() {
                        open.metadata.push(line.to_string());
                    }
                }
            }
        }

        // 输入结束时仍敞开的组/多边形按原样接受：未闭合的多边形
        // 不会挂到任何组上，与历史行为一致。
        Ok(car)
    }

    /// 组与多边形都必须处于打开状态，返回当前多边形。
    fn open_polygon<'p>(
        &self,
        group: Option<usize>,
        polygon: &'p mut Option<Polygon>,
    ) -> Result<&'p mut Polygon, DecodeError> {
        if group.is_none() {
            return Err(self.structure_error());
        }
        match polygon.as_mut() {
            Some(open) => Ok(open),
            None => Err(self.structure_error()),
        }
    }

    fn parse_color(&self, walk: &mut FieldWalk<'_>) -> Result<Color, DecodeError> {
        let r = self.parse_channel(walk.take())?;
        let g = self.parse_channel(walk.take())?;
        let b = self.parse_channel(walk.take())?;
        Ok(Color::new(r, g, b))
    }

    /// 颜色通道：空串视为 0，超出 [0, 255] 的值夹取到边界。
    fn parse_channel(&self, field: &str) -> Result<u8, DecodeError> {
        if field.trim().is_empty() {
            return Ok(0);
        }
        let value: i32 = field.parse().map_err(|_| self.numeric_error())?;
        Ok(value.clamp(0, 255) as u8)
    }

    /// 普通整数字段：空串视为 0，非空必须可解析。
    fn parse_int(&self, field: &str) -> Result<i32, DecodeError> {
        if field.trim().is_empty() {
            return Ok(0);
        }
        field.parse().map_err(|_| self.numeric_error())
    }

    /// `<wheel radius="R" depth="D">` 的两个属性，顺序不固定，
    /// 逐个按前缀重新匹配。
    fn parse_drag_shot_attributes(
        &self,
        mut rest: &str,
    ) -> Result<DragShotWheelDefinition, DecodeError> {
        let mut radius = 0;
        let mut depth = 0;
        for _ in 0..2 {
            if let Some(tail) = rest.strip_prefix("radius=\"") {
                let run = numeric_run(tail, 0);
                radius = self.parse_int(run)?;
                rest = tail
                    .get(run.len() + 1..)
                    .ok_or_else(|| self.structure_error())?
                    .trim_start();
            } else if let Some(tail) = rest.strip_prefix("depth=\"") {
                let run = numeric_run(tail, 0);
                depth = self.parse_int(run)?;
                rest = tail
                    .get(run.len() + 1..)
                    .ok_or_else(|| self.structure_error())?
                    .trim_start();
            } else {
                return Err(self.structure_error());
            }
        }
        Ok(DragShotWheelDefinition { radius, depth })
    }

    fn structure_error(&self) -> DecodeError {
        DecodeError::Structure {
            line: self.cursor.line(),
            content: self.cursor.last_read_line().trim().to_string(),
        }
    }

    fn numeric_error(&self) -> DecodeError {
        DecodeError::Numeric {
            line: self.cursor.line(),
            content: self.cursor.last_read_line().trim().to_string(),
        }
    }

    fn unsupported_error(&self) -> DecodeError {
        DecodeError::Unsupported {
            line: self.cursor.line(),
            content: self.cursor.last_read_line().trim().to_string(),
        }
    }
}
