use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::{debug, info};

use nfmrad_core::car::{Car, Color, PolyGroup, PolyGroupMode, random_group_name};

use crate::repository::CarRepository;
use crate::workspace::Workspace;

/// 一次命令调用：名字加已分词的参数（分词由外壳完成）。
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub name: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
    /// 带退出码的响应会让外壳结束循环。
    pub exit: Option<i32>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            exit: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            exit: None,
        }
    }

    pub fn exit(code: i32, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            exit: Some(code),
        }
    }
}

/// 参数的声明式类型描述。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Text,
    Int,
    Byte,
    Bool,
}

impl ParamKind {
    fn label(self) -> &'static str {
        match self {
            Self::Text => "string",
            Self::Int => "int",
            Self::Byte => "byte",
            Self::Bool => "bool",
        }
    }
}

/// 单个参数描述。`default` 非空时参数可省略，缺省值按同样的
/// 规则解析。
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: Option<&'static str>,
}

/// 绑定完成的参数值，下标与 `CommandSpec::params` 一一对应。
#[derive(Debug, Clone)]
pub enum ArgValue {
    Text(String),
    Int(i32),
    Byte(u8),
    Bool(bool),
}

#[derive(Debug, Clone, Default)]
pub struct ArgValues(Vec<ArgValue>);

impl ArgValues {
    pub fn text(&self, index: usize) -> &str {
        match &self.0[index] {
            ArgValue::Text(value) => value,
            other => panic!("内部错误：参数 {index} 不是字符串（{other:?}）"),
        }
    }

    pub fn int(&self, index: usize) -> i32 {
        match self.0[index] {
            ArgValue::Int(value) => value,
            ref other => panic!("内部错误：参数 {index} 不是整数（{other:?}）"),
        }
    }

    pub fn byte(&self, index: usize) -> u8 {
        match self.0[index] {
            ArgValue::Byte(value) => value,
            ref other => panic!("内部错误：参数 {index} 不是字节（{other:?}）"),
        }
    }

    pub fn bool(&self, index: usize) -> bool {
        match self.0[index] {
            ArgValue::Bool(value) => value,
            ref other => panic!("内部错误：参数 {index} 不是布尔值（{other:?}）"),
        }
    }
}

pub type CommandHandler =
    fn(&CommandBus, &mut CommandContext<'_>, &ArgValues) -> CommandResponse;

/// 注册表中的一条命令：名字、说明、参数描述、是否要求已加载
/// 车辆，以及普通函数指针形式的处理器。
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
    pub requires_car: bool,
    pub handler: CommandHandler,
}

impl CommandSpec {
    /// 列表展示用法：`name [type Name, ...]`。
    pub fn usage(&self) -> String {
        if self.params.is_empty() {
            return self.name.to_string();
        }
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{} {}", p.kind.label(), p.name))
            .collect();
        format!("{} [{}]", self.name, params.join(", "))
    }
}

pub struct CommandContext<'a> {
    pub workspace: &'a mut Workspace,
    pub repository: &'a mut dyn CarRepository,
}

/// 显式构建的命令注册表。名字小写存储、忽略大小写查找、
/// 按字典序排列（help 列表直接按序输出）。
pub struct CommandBus {
    commands: BTreeMap<&'static str, CommandSpec>,
}

impl CommandBus {
    pub fn new() -> Self {
        let mut bus = Self {
            commands: BTreeMap::new(),
        };
        bus.register(HELP);
        bus.register(HELP_COMMAND);
        bus.register(EXIT);
        bus.register(LOAD);
        bus.register(SAVE);
        bus.register(PRINT);
        bus.register(SET_CAR_FOLDER);
        bus.register(PRINT_CAR_FOLDER);
        bus.register(GROUPS_LIST);
        bus.register(GROUPS_NEW);
        bus.register(GROUPS_MOVE_POLY);
        bus.register(GROUPS_SET_COLOR);
        bus.register(GROUPS_REMOVE_EMPTY);
        bus.register(GROUPS_SET_FS);
        bus.register(CAR_SET_FS);
        bus.register(GROUPS_REMOVE_FS);
        bus.register(CAR_REMOVE_FS);
        bus.register(CAR_SET_OUTLINE);
        bus.register(GROUPS_SET_OUTLINE);
        bus.register(GROUPS_SET_GR);
        bus.register(GROUPS_SET_MODE);
        bus.register(COLORS_GET);
        bus.register(COLORS_SET);
        bus.register(COLORS_AUTO);
        bus.register(WHEELS_LIST);
        bus
    }

    pub fn register(&mut self, spec: CommandSpec) {
        self.commands.insert(spec.name, spec);
    }

    pub fn find(&self, name: &str) -> Option<&CommandSpec> {
        let lowered = name.to_ascii_lowercase();
        self.commands.get(lowered.as_str())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn specs(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.values()
    }

    pub fn dispatch(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let Some(spec) = self.find(&request.name) else {
            return CommandResponse::err(format!("未知命令: {}", request.name));
        };
        if spec.requires_car && !context.workspace.is_loaded() {
            return CommandResponse::err("尚未加载任何车辆。");
        }
        let values = match bind_arguments(spec, &request.args) {
            Ok(values) => values,
            Err(response) => return response,
        };
        debug!(command = spec.name, "分发命令");
        (spec.handler)(self, context, &values)
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

/// 将分词后的参数按描述逐个绑定：不足处用缺省值补齐，
/// 多余的尾部参数忽略。
fn bind_arguments(
    spec: &CommandSpec,
    args: &[String],
) -> Result<ArgValues, CommandResponse> {
    let mut values = Vec::with_capacity(spec.params.len());
    for (index, param) in spec.params.iter().enumerate() {
        let raw = match args.get(index).map(String::as_str) {
            Some(value) => value,
            None => match param.default {
                Some(default) => default,
                None => {
                    return Err(CommandResponse::err(format!(
                        "缺少参数 [{} {}]。",
                        param.kind.label(),
                        param.name
                    )));
                }
            },
        };
        let parsed = parse_value(param.kind, raw).ok_or_else(|| {
            CommandResponse::err(format!(
                "无法解析参数 [{} {}] 的值。",
                param.kind.label(),
                param.name
            ))
        })?;
        values.push(parsed);
    }
    Ok(ArgValues(values))
}

fn parse_value(kind: ParamKind, raw: &str) -> Option<ArgValue> {
    match kind {
        ParamKind::Text => Some(ArgValue::Text(raw.to_string())),
        ParamKind::Int => raw.trim().parse().ok().map(ArgValue::Int),
        ParamKind::Byte => raw.trim().parse().ok().map(ArgValue::Byte),
        ParamKind::Bool => {
            let lowered = raw.trim().to_ascii_lowercase();
            match lowered.as_str() {
                "true" => Some(ArgValue::Bool(true)),
                "false" => Some(ArgValue::Bool(false)),
                _ => None,
            }
        }
    }
}

fn checked_group_index(car: &Car, index: i32) -> Result<usize, CommandResponse> {
    if index >= 0 && (index as usize) < car.poly_groups.len() {
        Ok(index as usize)
    } else {
        Err(CommandResponse::err(format!("组下标 {index} 超出范围。")))
    }
}

fn group_display_name(group: &PolyGroup, index: usize) -> String {
    if group.name.trim().is_empty() {
        format!("Group_{}", index + 1)
    } else {
        group.name.clone()
    }
}

const COMMANDS_PER_PAGE: usize = 20;

const HELP: CommandSpec = CommandSpec {
    name: "help",
    description: "列出全部可用命令。可选的页码参数用于翻页。",
    params: &[ParamSpec {
        name: "Page",
        kind: ParamKind::Int,
        default: Some("1"),
    }],
    requires_car: false,
    handler: help,
};

fn help(bus: &CommandBus, _context: &mut CommandContext<'_>, args: &ArgValues) -> CommandResponse {
    let page = args.int(0);
    let pages = bus.len().div_ceil(COMMANDS_PER_PAGE).max(1);
    if page < 1 || page as usize > pages {
        return CommandResponse::err(format!("页码 {page} 不合法。"));
    }
    let skip = (page as usize - 1) * COMMANDS_PER_PAGE;
    let mut lines = vec![format!("命令列表 [第 {page}/{pages} 页]：")];
    for spec in bus.specs().skip(skip).take(COMMANDS_PER_PAGE) {
        lines.push(spec.usage());
    }
    lines.push("输入 help <页码> 查看其他页，help.command <命令> 查看详情。".to_string());
    CommandResponse::ok(lines.join("\n"))
}

const HELP_COMMAND: CommandSpec = CommandSpec {
    name: "help.command",
    description: "显示指定命令的说明。不带参数时显示自身的说明。",
    params: &[ParamSpec {
        name: "Command",
        kind: ParamKind::Text,
        default: Some("help.command"),
    }],
    requires_car: false,
    handler: help_command,
};

fn help_command(
    bus: &CommandBus,
    _context: &mut CommandContext<'_>,
    args: &ArgValues,
) -> CommandResponse {
    let name = args.text(0);
    if name.trim().is_empty() {
        return CommandResponse::err("缺少命令名。");
    }
    let Some(spec) = bus.find(name) else {
        return CommandResponse::err(format!("命令 \"{name}\" 不存在。"));
    };
    CommandResponse::ok(format!(
        "命令 \"{}\" 的说明：\n{}\n用法：{}",
        spec.name,
        spec.description,
        spec.usage()
    ))
}

const EXIT: CommandSpec = CommandSpec {
    name: "exit",
    description: "退出程序。",
    params: &[],
    requires_car: false,
    handler: exit,
};

fn exit(_bus: &CommandBus, _context: &mut CommandContext<'_>, _args: &ArgValues) -> CommandResponse {
    CommandResponse::exit(0, "正在退出。")
}

const LOAD: CommandSpec = CommandSpec {
    name: "load",
    description: "从当前车辆目录加载一辆车。车名不含扩展名。",
    params: &[ParamSpec {
        name: "CarName",
        kind: ParamKind::Text,
        default: None,
    }],
    requires_car: false,
    handler: load,
};

fn load(_bus: &CommandBus, context: &mut CommandContext<'_>, args: &ArgValues) -> CommandResponse {
    let name = args.text(0);
    if name.trim().is_empty() {
        return CommandResponse::err("车辆文件名不合法。");
    }
    match context.repository.load_car(name) {
        Ok(Some(car)) => {
            info!(car = name, polygons = car.polygon_count(), "车辆已加载");
            context.workspace.replace(car);
            CommandResponse::ok("车辆已加载。")
        }
        Ok(None) => CommandResponse::err("车辆加载失败。"),
        Err(err) => CommandResponse::err(err.to_string()),
    }
}

const SAVE: CommandSpec = CommandSpec {
    name: "save",
    description: "将当前车辆保存到车辆目录。车名不含扩展名。",
    params: &[ParamSpec {
        name: "CarName",
        kind: ParamKind::Text,
        default: None,
    }],
    requires_car: true,
    handler: save,
};

fn save(_bus: &CommandBus, context: &mut CommandContext<'_>, args: &ArgValues) -> CommandResponse {
    let name = args.text(0);
    if name.trim().is_empty() {
        return CommandResponse::err("未指定车辆名。");
    }
    let Some(car) = context.workspace.car() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    match context.repository.save_car(name, car) {
        Ok(path) => CommandResponse::ok(format!("车辆已保存：\"{}\"。", path.display())),
        Err(err) => CommandResponse::err(err.to_string()),
    }
}

const PRINT: CommandSpec = CommandSpec {
    name: "print",
    description: "打印当前车辆的代码。",
    params: &[],
    requires_car: true,
    handler: print,
};

fn print(_bus: &CommandBus, context: &mut CommandContext<'_>, _args: &ArgValues) -> CommandResponse {
    let Some(car) = context.workspace.car() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let rendered = context.repository.render_car(car);
    CommandResponse::ok(format!("车辆代码：\n{rendered}"))
}

const SET_CAR_FOLDER: CommandSpec = CommandSpec {
    name: "game.setcarfolder",
    description: "设置加载与保存车辆所用的目录。",
    params: &[ParamSpec {
        name: "Folder",
        kind: ParamKind::Text,
        default: None,
    }],
    requires_car: false,
    handler: set_car_folder,
};

fn set_car_folder(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    args: &ArgValues,
) -> CommandResponse {
    let folder = args.text(0);
    match context.repository.set_directory(Path::new(folder)) {
        Ok(path) => CommandResponse::ok(format!("车辆目录已设置为：\"{}\"。", path.display())),
        Err(err) => CommandResponse::err(err.to_string()),
    }
}

const PRINT_CAR_FOLDER: CommandSpec = CommandSpec {
    name: "game.carfolder",
    description: "打印当前车辆目录。",
    params: &[],
    requires_car: false,
    handler: print_car_folder,
};

fn print_car_folder(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    _args: &ArgValues,
) -> CommandResponse {
    match context.repository.directory() {
        Some(path) => CommandResponse::ok(path.display().to_string()),
        None => CommandResponse::err("车辆目录尚未设置。"),
    }
}

const GROUPS_LIST: CommandSpec = CommandSpec {
    name: "car.groups.list",
    description: "列出当前车辆的全部多边形组（下标、名字、多边形数、模式）。",
    params: &[],
    requires_car: true,
    handler: groups_list,
};

fn groups_list(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    _args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let mut lines = vec!["多边形组：".to_string()];
    for (index, group) in car.poly_groups.iter().enumerate() {
        lines.push(format!(
            "[{index}] - {} - （{} 个多边形，{}）",
            group_display_name(group, index),
            group.len(),
            group.mode()
        ));
    }
    CommandResponse::ok(lines.join("\n"))
}

const GROUPS_NEW: CommandSpec = CommandSpec {
    name: "car.groups.new",
    description: "创建一个新的多边形组。名字省略时生成随机名。",
    params: &[ParamSpec {
        name: "Name",
        kind: ParamKind::Text,
        default: Some(""),
    }],
    requires_car: true,
    handler: groups_new,
};

fn groups_new(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car_mut() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let requested = args.text(0);
    let name = if requested.trim().is_empty() {
        random_group_name()
    } else {
        requested.to_string()
    };
    car.poly_groups.push(PolyGroup::new(name.clone()));
    CommandResponse::ok(format!(
        "已创建新组：[{}] - {name}",
        car.poly_groups.len() - 1
    ))
}

const GROUPS_MOVE_POLY: CommandSpec = CommandSpec {
    name: "car.groups.movepoly",
    description: "把一段多边形从一个组移动到另一个组。\n\
        SourceGroupIndex/TargetGroupIndex 为组下标，PolyStartIndex 为首个\n\
        多边形下标，PolyCount 为数量。用 car.groups.list 查看下标。",
    params: &[
        ParamSpec {
            name: "SourceGroupIndex",
            kind: ParamKind::Int,
            default: None,
        },
        ParamSpec {
            name: "TargetGroupIndex",
            kind: ParamKind::Int,
            default: None,
        },
        ParamSpec {
            name: "PolyStartIndex",
            kind: ParamKind::Int,
            default: None,
        },
        ParamSpec {
            name: "PolyCount",
            kind: ParamKind::Int,
            default: None,
        },
    ],
    requires_car: true,
    handler: groups_move_poly,
};

fn groups_move_poly(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car_mut() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let source = match checked_group_index(car, args.int(0)) {
        Ok(index) => index,
        Err(response) => return response,
    };
    let target = match checked_group_index(car, args.int(1)) {
        Ok(index) => index,
        Err(response) => return response,
    };
    if source == target {
        return CommandResponse::err("源组与目标组相同。");
    }
    let start = args.int(2);
    let count = args.int(3);
    if start < 0 || count < 0 {
        return CommandResponse::err("下标与数量不能为负。");
    }
    let (start, count) = (start as usize, count as usize);
    if start + count > car.poly_groups[source].len() {
        return CommandResponse::err(format!(
            "范围 [{start}, {}) 超出组 [{source}] 的多边形数量。",
            start + count
        ));
    }
    let moved = car.poly_groups[source].drain_range(start, count);
    car.poly_groups[target].add_polygons(moved);
    CommandResponse::ok(format!(
        "{count} 个多边形已从组 [{source}] 移动到组 [{target}]。"
    ))
}

const GROUPS_SET_COLOR: CommandSpec = CommandSpec {
    name: "car.groups.setcolor",
    description: "将指定组内所有多边形设为同一颜色（R/G/B 通道）。",
    params: &[
        ParamSpec {
            name: "GroupIndex",
            kind: ParamKind::Int,
            default: None,
        },
        ParamSpec {
            name: "R",
            kind: ParamKind::Byte,
            default: None,
        },
        ParamSpec {
            name: "G",
            kind: ParamKind::Byte,
            default: None,
        },
        ParamSpec {
            name: "B",
            kind: ParamKind::Byte,
            default: None,
        },
    ],
    requires_car: true,
    handler: groups_set_color,
};

fn groups_set_color(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car_mut() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let index = match checked_group_index(car, args.int(0)) {
        Ok(index) => index,
        Err(response) => return response,
    };
    let color = Color::new(args.byte(1), args.byte(2), args.byte(3));
    car.poly_groups[index].set_color(color);
    CommandResponse::ok(format!("组 [{index}] 的颜色已改为 {color}。"))
}

const GROUPS_REMOVE_EMPTY: CommandSpec = CommandSpec {
    name: "car.groups.removeempty",
    description: "移除所有不含多边形的组。",
    params: &[],
    requires_car: true,
    handler: groups_remove_empty,
};

fn groups_remove_empty(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    _args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car_mut() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let before = car.poly_groups.len();
    car.poly_groups.retain(|group| !group.is_empty());
    CommandResponse::ok(format!("已移除 {} 个空组。", before - car.poly_groups.len()))
}

const GROUPS_SET_FS: CommandSpec = CommandSpec {
    name: "car.groups.setfs",
    description: "为指定组内所有多边形设置 fs(x) 值。",
    params: &[
        ParamSpec {
            name: "GroupIndex",
            kind: ParamKind::Int,
            default: None,
        },
        ParamSpec {
            name: "FsValue",
            kind: ParamKind::Int,
            default: None,
        },
    ],
    requires_car: true,
    handler: groups_set_fs,
};

fn groups_set_fs(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car_mut() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let index = match checked_group_index(car, args.int(0)) {
        Ok(index) => index,
        Err(response) => return response,
    };
    let value = args.int(1);
    let group = &mut car.poly_groups[index];
    for polygon in group.polygons_mut() {
        polygon.fs = Some(value);
    }
    CommandResponse::ok(format!(
        "组 [{index}] 的 {} 个多边形的 fs 值已设为 {value}。",
        group.len()
    ))
}

const CAR_SET_FS: CommandSpec = CommandSpec {
    name: "car.setfs",
    description: "为整车所有多边形设置 fs(x) 值。",
    params: &[ParamSpec {
        name: "FsValue",
        kind: ParamKind::Int,
        default: None,
    }],
    requires_car: true,
    handler: car_set_fs,
};

fn car_set_fs(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car_mut() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let value = args.int(0);
    let mut polygon_count = 0;
    for group in &mut car.poly_groups {
        polygon_count += group.len();
        for polygon in group.polygons_mut() {
            polygon.fs = Some(value);
        }
    }
    CommandResponse::ok(format!(
        "已为 {} 个组中的 {polygon_count} 个多边形设置 fs = {value}。",
        car.poly_groups.len()
    ))
}

const GROUPS_REMOVE_FS: CommandSpec = CommandSpec {
    name: "car.groups.removefs",
    description: "移除指定组内所有多边形的 fs(x) 值。",
    params: &[ParamSpec {
        name: "GroupIndex",
        kind: ParamKind::Int,
        default: None,
    }],
    requires_car: true,
    handler: groups_remove_fs,
};

fn groups_remove_fs(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car_mut() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let index = match checked_group_index(car, args.int(0)) {
        Ok(index) => index,
        Err(response) => return response,
    };
    let group = &mut car.poly_groups[index];
    for polygon in group.polygons_mut() {
        polygon.fs = None;
    }
    CommandResponse::ok(format!(
        "已移除组 [{index}] 中 {} 个多边形的 fs 值。",
        group.len()
    ))
}

const CAR_REMOVE_FS: CommandSpec = CommandSpec {
    name: "car.removefs",
    description: "移除整车所有多边形的 fs(x) 值。",
    params: &[],
    requires_car: true,
    handler: car_remove_fs,
};

fn car_remove_fs(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    _args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car_mut() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let mut polygon_count = 0;
    for group in &mut car.poly_groups {
        polygon_count += group.len();
        for polygon in group.polygons_mut() {
            polygon.fs = None;
        }
    }
    CommandResponse::ok(format!(
        "已移除 {} 个组中 {polygon_count} 个多边形的 fs 值。",
        car.poly_groups.len()
    ))
}

const CAR_SET_OUTLINE: CommandSpec = CommandSpec {
    name: "car.setoutline",
    description: "为整车开关描边。true 保留描边，false 添加 noOutline。",
    params: &[ParamSpec {
        name: "Value",
        kind: ParamKind::Bool,
        default: None,
    }],
    requires_car: true,
    handler: car_set_outline,
};

fn car_set_outline(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car_mut() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let outline = args.bool(0);
    let mut polygon_count = 0;
    for group in &mut car.poly_groups {
        polygon_count += group.len();
        for polygon in group.polygons_mut() {
            polygon.no_outline = !outline;
        }
    }
    let action = if outline { "移除" } else { "添加" };
    CommandResponse::ok(format!(
        "已为 {polygon_count} 个多边形{action} noOutline 属性。"
    ))
}

const GROUPS_SET_OUTLINE: CommandSpec = CommandSpec {
    name: "car.groups.setoutline",
    description: "为指定组开关描边。true 保留描边，false 添加 noOutline。",
    params: &[
        ParamSpec {
            name: "GroupIndex",
            kind: ParamKind::Int,
            default: None,
        },
        ParamSpec {
            name: "Value",
            kind: ParamKind::Bool,
            default: None,
        },
    ],
    requires_car: true,
    handler: groups_set_outline,
};

fn groups_set_outline(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car_mut() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let index = match checked_group_index(car, args.int(0)) {
        Ok(index) => index,
        Err(response) => return response,
    };
    let outline = args.bool(1);
    let group = &mut car.poly_groups[index];
    for polygon in group.polygons_mut() {
        polygon.no_outline = !outline;
    }
    let action = if outline { "移除" } else { "添加" };
    CommandResponse::ok(format!(
        "已为组 [{index}] 的 {} 个多边形{action} noOutline 属性。",
        group.len()
    ))
}

const GROUPS_SET_GR: CommandSpec = CommandSpec {
    name: "car.groups.setgr",
    description: "设置或移除指定组的 gr(x) 值。取 0 表示移除。",
    params: &[
        ParamSpec {
            name: "GroupIndex",
            kind: ParamKind::Int,
            default: None,
        },
        ParamSpec {
            name: "Value",
            kind: ParamKind::Int,
            default: None,
        },
    ],
    requires_car: true,
    handler: groups_set_gr,
};

fn groups_set_gr(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car_mut() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let index = match checked_group_index(car, args.int(0)) {
        Ok(index) => index,
        Err(response) => return response,
    };
    let value = args.int(1);
    let group = &mut car.poly_groups[index];
    for polygon in group.polygons_mut() {
        polygon.gr = value;
    }
    let action = if value == 0 {
        "移除".to_string()
    } else {
        format!("设为 {value}")
    };
    CommandResponse::ok(format!(
        "已将组 [{index}] 中 {} 个多边形的 gr 值{action}。",
        group.len()
    ))
}

const GROUPS_SET_MODE: CommandSpec = CommandSpec {
    name: "car.groups.setmode",
    description: "切换指定组的模式（normal / dragshotwheel / phyrexianwheel，\n\
        支持 n、ds、dsw、phy 等历史别名）。切换会同步修正组内多边形的标记风格。",
    params: &[
        ParamSpec {
            name: "GroupIndex",
            kind: ParamKind::Int,
            default: None,
        },
        ParamSpec {
            name: "Mode",
            kind: ParamKind::Text,
            default: None,
        },
    ],
    requires_car: true,
    handler: groups_set_mode,
};

fn groups_set_mode(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car_mut() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let index = match checked_group_index(car, args.int(0)) {
        Ok(index) => index,
        Err(response) => return response,
    };
    let raw = args.text(1);
    let Some(mode) = PolyGroupMode::from_alias(raw) else {
        return CommandResponse::err(format!(
            "无法识别的模式 \"{raw}\"。可用：normal(n)、dragshotwheel(ds/dsw)、phyrexianwheel(phy)。"
        ));
    };
    car.poly_groups[index].set_mode(mode);
    CommandResponse::ok(format!("组 [{index}] 的模式已切换为 {mode}。"))
}

const COLORS_GET: CommandSpec = CommandSpec {
    name: "car.colors.get",
    description: "打印指定的车漆颜色。1 为 1stColor，2 为 2ndColor。",
    params: &[ParamSpec {
        name: "CarColorNumber",
        kind: ParamKind::Int,
        default: None,
    }],
    requires_car: true,
    handler: colors_get,
};

fn colors_get(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let number = args.int(0);
    match number {
        1 => match car.first_color {
            Some(color) => CommandResponse::ok(format!("1stColor({color})")),
            None => CommandResponse::ok("1stColor 尚未定义。"),
        },
        2 => match car.second_color {
            Some(color) => CommandResponse::ok(format!("2ndColor({color})")),
            None => CommandResponse::ok("2ndColor 尚未定义。"),
        },
        _ => CommandResponse::err(format!(
            "颜色编号 {number} 不合法。NFM 车辆有两个车漆颜色：1 和 2。"
        )),
    }
}

const COLORS_SET: CommandSpec = CommandSpec {
    name: "car.colors.set",
    description: "设置指定的车漆颜色。1 为 1stColor，2 为 2ndColor。",
    params: &[
        ParamSpec {
            name: "CarColorNumber",
            kind: ParamKind::Int,
            default: None,
        },
        ParamSpec {
            name: "R",
            kind: ParamKind::Byte,
            default: None,
        },
        ParamSpec {
            name: "G",
            kind: ParamKind::Byte,
            default: None,
        },
        ParamSpec {
            name: "B",
            kind: ParamKind::Byte,
            default: None,
        },
    ],
    requires_car: true,
    handler: colors_set,
};

fn colors_set(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car_mut() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let number = args.int(0);
    let color = Color::new(args.byte(1), args.byte(2), args.byte(3));
    match number {
        1 => {
            car.first_color = Some(color);
            CommandResponse::ok(format!("1stColor 已改为 {color}。"))
        }
        2 => {
            car.second_color = Some(color);
            CommandResponse::ok(format!("2ndColor 已改为 {color}。"))
        }
        _ => CommandResponse::err(format!(
            "颜色编号 {number} 不合法。NFM 车辆有两个车漆颜色：1 和 2。"
        )),
    }
}

const COLORS_AUTO: CommandSpec = CommandSpec {
    name: "car.colors.auto",
    description: "统计全车多边形颜色，用出现最多的两种设置 1stColor 与 2ndColor。",
    params: &[],
    requires_car: true,
    handler: colors_auto,
};

fn colors_auto(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    _args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car_mut() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    let mut counts: HashMap<Color, usize> = HashMap::new();
    for group in &car.poly_groups {
        for polygon in group.polygons() {
            *counts.entry(polygon.color).or_insert(0) += 1;
        }
    }
    let mut first = Color::default();
    let mut first_count = 0;
    let mut second = Color::default();
    let mut second_count = 0;
    for (color, count) in counts {
        if count > first_count {
            second = first;
            second_count = first_count;
            first = color;
            first_count = count;
        } else if count > second_count {
            second = color;
            second_count = count;
        }
    }
    car.first_color = Some(first);
    car.second_color = Some(second);
    CommandResponse::ok(format!(
        "1stColor 已设为 ({first}) - {first_count} 个多边形，2ndColor 已设为 ({second}) - {second_count} 个多边形。"
    ))
}

const WHEELS_LIST: CommandSpec = CommandSpec {
    name: "car.wheels.list",
    description: "列出当前车辆的轮子记录（gwgr、轮毂与实例数）。",
    params: &[],
    requires_car: true,
    handler: wheels_list,
};

fn wheels_list(
    _bus: &CommandBus,
    context: &mut CommandContext<'_>,
    _args: &ArgValues,
) -> CommandResponse {
    let Some(car) = context.workspace.car() else {
        return CommandResponse::err("尚未加载任何车辆。");
    };
    if car.wheels.is_empty() {
        return CommandResponse::ok("当前车辆没有轮子记录。");
    }
    let mut lines = vec!["轮子：".to_string()];
    for (index, wheel) in car.wheels.iter().enumerate() {
        lines.push(format!(
            "[{index}] - gwgr={}，轮毂 rims({},{},{})，{} 个实例",
            wheel.gw_gr, wheel.rims_color, wheel.rim_size, wheel.rim_depth,
            wheel.instances.len()
        ));
    }
    CommandResponse::ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use nfmrad_core::car::{Car, Polygon};

    use super::*;
    use crate::errors::RepositoryError;

    /// 测试用仓库：两辆固定的车，目录可设。
    struct FakeRepository {
        directory: Option<PathBuf>,
    }

    impl FakeRepository {
        fn new() -> Self {
            Self { directory: None }
        }
    }

    impl CarRepository for FakeRepository {
        fn load_car(&self, name: &str) -> Result<Option<Car>, RepositoryError> {
            match name {
                "sample" => {
                    let mut car = Car::new();
                    let mut group = PolyGroup::new("Body");
                    group.add_polygon(Polygon::new());
                    car.poly_groups.push(group);
                    Ok(Some(car))
                }
                "empty" => Ok(None),
                other => Err(RepositoryError::Storage(format!("车辆 {other} 不存在"))),
            }
        }

        fn save_car(&self, name: &str, _car: &Car) -> Result<PathBuf, RepositoryError> {
            Ok(PathBuf::from(format!("/tmp/{name}.rad")))
        }

        fn render_car(&self, car: &Car) -> String {
            format!("<{} groups>", car.poly_groups.len())
        }

        fn directory(&self) -> Option<PathBuf> {
            self.directory.clone()
        }

        fn set_directory(&mut self, path: &Path) -> Result<PathBuf, RepositoryError> {
            self.directory = Some(path.to_path_buf());
            Ok(path.to_path_buf())
        }
    }

    fn request(name: &str, args: &[&str]) -> CommandRequest {
        CommandRequest {
            name: name.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn dispatch(
        bus: &CommandBus,
        workspace: &mut Workspace,
        repository: &mut FakeRepository,
        name: &str,
        args: &[&str],
    ) -> CommandResponse {
        let mut context = CommandContext {
            workspace,
            repository,
        };
        bus.dispatch(&request(name, args), &mut context)
    }

    fn loaded_workspace() -> Workspace {
        let mut workspace = Workspace::new();
        let mut car = Car::new();
        let mut body = PolyGroup::new("Body");
        body.add_polygon(Polygon::new());
        body.add_polygon(Polygon::new());
        body.add_polygon(Polygon::new());
        car.poly_groups.push(body);
        car.poly_groups.push(PolyGroup::new("Spoiler"));
        workspace.replace(car);
        workspace
    }

    #[test]
    fn unknown_command_is_reported() {
        let bus = CommandBus::new();
        let mut workspace = Workspace::new();
        let mut repo = FakeRepository::new();
        let response = dispatch(&bus, &mut workspace, &mut repo, "does.not.exist", &[]);
        assert!(!response.success);
        assert!(response.message.unwrap().contains("未知命令"));
    }

    #[test]
    fn commands_require_loaded_car() {
        let bus = CommandBus::new();
        let mut workspace = Workspace::new();
        let mut repo = FakeRepository::new();
        let response = dispatch(&bus, &mut workspace, &mut repo, "print", &[]);
        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some("尚未加载任何车辆。"));
    }

    #[test]
    fn dispatch_is_case_insensitive() {
        let bus = CommandBus::new();
        let mut workspace = loaded_workspace();
        let mut repo = FakeRepository::new();
        let response = dispatch(&bus, &mut workspace, &mut repo, "CAR.GROUPS.LIST", &[]);
        assert!(response.success);
        assert!(response.message.unwrap().contains("Body"));
    }

    #[test]
    fn missing_required_argument_is_reported() {
        let bus = CommandBus::new();
        let mut workspace = loaded_workspace();
        let mut repo = FakeRepository::new();
        let response = dispatch(&bus, &mut workspace, &mut repo, "car.groups.setfs", &["0"]);
        assert!(!response.success);
        assert!(response.message.unwrap().contains("缺少参数 [int FsValue]"));
    }

    #[test]
    fn unparsable_argument_is_reported() {
        let bus = CommandBus::new();
        let mut workspace = loaded_workspace();
        let mut repo = FakeRepository::new();
        let response = dispatch(
            &bus,
            &mut workspace,
            &mut repo,
            "car.groups.setfs",
            &["0", "abc"],
        );
        assert!(!response.success);
        assert!(response.message.unwrap().contains("无法解析参数"));
    }

    #[test]
    fn optional_argument_uses_default() {
        let bus = CommandBus::new();
        let mut workspace = loaded_workspace();
        let mut repo = FakeRepository::new();
        let response = dispatch(&bus, &mut workspace, &mut repo, "help", &[]);
        assert!(response.success);
        assert!(response.message.unwrap().contains("命令列表 [第 1/"));
    }

    #[test]
    fn load_and_print_through_repository() {
        let bus = CommandBus::new();
        let mut workspace = Workspace::new();
        let mut repo = FakeRepository::new();

        let response = dispatch(&bus, &mut workspace, &mut repo, "load", &["sample"]);
        assert!(response.success, "{:?}", response.message);
        assert!(workspace.is_loaded());

        let response = dispatch(&bus, &mut workspace, &mut repo, "print", &[]);
        assert!(response.success);
        assert!(response.message.unwrap().contains("<1 groups>"));
    }

    #[test]
    fn load_of_blank_file_fails_gracefully() {
        let bus = CommandBus::new();
        let mut workspace = Workspace::new();
        let mut repo = FakeRepository::new();
        let response = dispatch(&bus, &mut workspace, &mut repo, "load", &["empty"]);
        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some("车辆加载失败。"));
        assert!(!workspace.is_loaded());
    }

    #[test]
    fn set_and_print_car_folder() {
        let bus = CommandBus::new();
        let mut workspace = Workspace::new();
        let mut repo = FakeRepository::new();

        let response = dispatch(&bus, &mut workspace, &mut repo, "game.carfolder", &[]);
        assert!(!response.success);

        let response = dispatch(
            &bus,
            &mut workspace,
            &mut repo,
            "game.setcarfolder",
            &["/cars"],
        );
        assert!(response.success);

        let response = dispatch(&bus, &mut workspace, &mut repo, "game.carfolder", &[]);
        assert!(response.success);
        assert_eq!(response.message.as_deref(), Some("/cars"));
    }

    #[test]
    fn movepoly_transfers_range_between_groups() {
        let bus = CommandBus::new();
        let mut workspace = loaded_workspace();
        let mut repo = FakeRepository::new();

        let response = dispatch(
            &bus,
            &mut workspace,
            &mut repo,
            "car.groups.movepoly",
            &["0", "1", "1", "2"],
        );
        assert!(response.success, "{:?}", response.message);

        let car = workspace.car().unwrap();
        assert_eq!(car.poly_groups[0].len(), 1);
        assert_eq!(car.poly_groups[1].len(), 2);
        let target_id = car.poly_groups[1].id();
        assert!(
            car.poly_groups[1]
                .polygons()
                .iter()
                .all(|p| p.group() == Some(target_id))
        );
    }

    #[test]
    fn movepoly_rejects_bad_ranges() {
        let bus = CommandBus::new();
        let mut workspace = loaded_workspace();
        let mut repo = FakeRepository::new();

        let response = dispatch(
            &bus,
            &mut workspace,
            &mut repo,
            "car.groups.movepoly",
            &["0", "1", "2", "5"],
        );
        assert!(!response.success);

        let response = dispatch(
            &bus,
            &mut workspace,
            &mut repo,
            "car.groups.movepoly",
            &["0", "9", "0", "1"],
        );
        assert!(!response.success);
        assert!(response.message.unwrap().contains("超出范围"));
    }

    #[test]
    fn setmode_alias_propagates_markup() {
        let bus = CommandBus::new();
        let mut workspace = loaded_workspace();
        let mut repo = FakeRepository::new();

        let response = dispatch(
            &bus,
            &mut workspace,
            &mut repo,
            "car.groups.setmode",
            &["0", "phy"],
        );
        assert!(response.success, "{:?}", response.message);

        let car = workspace.car().unwrap();
        assert_eq!(car.poly_groups[0].mode(), PolyGroupMode::PhyrexianWheel);
        assert!(
            car.poly_groups[0]
                .polygons()
                .iter()
                .all(|p| p.alternative_markup)
        );

        let response = dispatch(
            &bus,
            &mut workspace,
            &mut repo,
            "car.groups.setmode",
            &["0", "spinner"],
        );
        assert!(!response.success);
    }

    #[test]
    fn colors_auto_picks_two_most_common() {
        let bus = CommandBus::new();
        let mut workspace = Workspace::new();
        let mut car = Car::new();
        let mut group = PolyGroup::new("G");
        for color in [
            Color::new(1, 1, 1),
            Color::new(1, 1, 1),
            Color::new(1, 1, 1),
            Color::new(2, 2, 2),
            Color::new(2, 2, 2),
            Color::new(3, 3, 3),
        ] {
            let mut polygon = Polygon::new();
            polygon.color = color;
            group.add_polygon(polygon);
        }
        car.poly_groups.push(group);
        workspace.replace(car);
        let mut repo = FakeRepository::new();

        let response = dispatch(&bus, &mut workspace, &mut repo, "car.colors.auto", &[]);
        assert!(response.success);

        let car = workspace.car().unwrap();
        assert_eq!(car.first_color, Some(Color::new(1, 1, 1)));
        assert_eq!(car.second_color, Some(Color::new(2, 2, 2)));
    }

    #[test]
    fn exit_carries_exit_code() {
        let bus = CommandBus::new();
        let mut workspace = Workspace::new();
        let mut repo = FakeRepository::new();
        let response = dispatch(&bus, &mut workspace, &mut repo, "exit", &[]);
        assert!(response.success);
        assert_eq!(response.exit, Some(0));
    }

    #[test]
    fn help_command_describes_registered_command() {
        let bus = CommandBus::new();
        let mut workspace = Workspace::new();
        let mut repo = FakeRepository::new();
        let response = dispatch(&bus, &mut workspace, &mut repo, "help.command", &["load"]);
        assert!(response.success);
        let message = response.message.unwrap();
        assert!(message.contains("load"));
        assert!(message.contains("string CarName"));

        let response = dispatch(&bus, &mut workspace, &mut repo, "help.command", &["nope"]);
        assert!(!response.success);
    }

    #[test]
    fn groups_new_generates_random_name_when_blank() {
        let bus = CommandBus::new();
        let mut workspace = loaded_workspace();
        let mut repo = FakeRepository::new();

        let response = dispatch(&bus, &mut workspace, &mut repo, "car.groups.new", &[]);
        assert!(response.success);
        let car = workspace.car().unwrap();
        let created = car.poly_groups.last().unwrap();
        assert_eq!(created.name.len(), 8);
        assert!(created.name.chars().all(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn setfs_and_removefs_cover_whole_car() {
        let bus = CommandBus::new();
        let mut workspace = loaded_workspace();
        let mut repo = FakeRepository::new();

        let response = dispatch(&bus, &mut workspace, &mut repo, "car.setfs", &["7"]);
        assert!(response.success);
        assert!(
            workspace
                .car()
                .unwrap()
                .poly_groups
                .iter()
                .flat_map(|g| g.polygons())
                .all(|p| p.fs == Some(7))
        );

        let response = dispatch(&bus, &mut workspace, &mut repo, "car.removefs", &[]);
        assert!(response.success);
        assert!(
            workspace
                .car()
                .unwrap()
                .poly_groups
                .iter()
                .flat_map(|g| g.polygons())
                .all(|p| p.fs.is_none())
        );
    }
}
