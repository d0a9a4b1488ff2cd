pub mod command;

pub mod errors {
    use std::path::PathBuf;

    use thiserror::Error;

    /// 存储层（由前端实现）向命令层汇报的失败。
    #[derive(Debug, Error)]
    pub enum RepositoryError {
        #[error("车辆目录尚未设置")]
        DirectoryNotSet,
        #[error("目录 {0:?} 不存在")]
        DirectoryNotFound(PathBuf),
        #[error("车辆文件名 \"{0}\" 不合法")]
        InvalidCarName(String),
        #[error("{0}")]
        Storage(String),
    }
}

pub mod repository {
    use std::path::{Path, PathBuf};

    use nfmrad_core::car::Car;

    use crate::errors::RepositoryError;

    /// 车辆存取的接缝。引擎只关心“按名字取车/存车”，
    /// 文件路径、编解码与配置持久化都留给实现方。
    pub trait CarRepository {
        /// 按名字加载。`Ok(None)` 表示文件内容为空（“没有车”）。
        fn load_car(&self, name: &str) -> Result<Option<Car>, RepositoryError>;
        /// 保存并返回落盘路径。
        fn save_car(&self, name: &str, car: &Car) -> Result<PathBuf, RepositoryError>;
        /// 渲染为规范文本（供 print 输出）。
        fn render_car(&self, car: &Car) -> String;
        fn directory(&self) -> Option<PathBuf>;
        fn set_directory(&mut self, path: &Path) -> Result<PathBuf, RepositoryError>;
    }
}

pub mod workspace {
    use nfmrad_core::car::Car;
    use tracing::debug;

    /// 编辑会话状态：当前加载的车。取代历史实现中的全局单例，
    /// 由命令层显式持有并传递。
    #[derive(Debug, Default)]
    pub struct Workspace {
        car: Option<Car>,
    }

    impl Workspace {
        pub fn new() -> Self {
            Self::default()
        }

        #[inline]
        pub fn is_loaded(&self) -> bool {
            self.car.is_some()
        }

        #[inline]
        pub fn car(&self) -> Option<&Car> {
            self.car.as_ref()
        }

        #[inline]
        pub fn car_mut(&mut self) -> Option<&mut Car> {
            self.car.as_mut()
        }

        /// 整体替换当前车辆。
        pub fn replace(&mut self, car: Car) {
            debug!(
                groups = car.poly_groups.len(),
                wheels = car.wheels.len(),
                polygons = car.polygon_count(),
                "工作区载入新车辆"
            );
            self.car = Some(car);
        }

        /// 卸载当前车辆并返回它。
        pub fn close(&mut self) -> Option<Car> {
            self.car.take()
        }
    }

}
