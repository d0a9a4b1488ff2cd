use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use nfmrad_config::AppConfig;
use nfmrad_core::car::Car;
use nfmrad_engine::errors::RepositoryError;
use nfmrad_engine::repository::CarRepository;
use nfmrad_io::{CarLoader, CarSaver, RadFacade, encode};

/// 文件名里不允许出现的字符（跨平台取并集）。
const INVALID_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// 基于配置目录与 `.rad` 门面的车辆存取实现。
/// 目录变更会同步持久化配置。
pub struct CarStore {
    config: AppConfig,
    config_path: Option<PathBuf>,
    facade: RadFacade,
}

impl CarStore {
    pub fn new(config: AppConfig, config_path: Option<PathBuf>) -> Self {
        Self {
            config,
            config_path,
            facade: RadFacade::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 目录已配置且在磁盘上存在。
    pub fn has_usable_directory(&self) -> bool {
        self.config
            .cars
            .directory
            .as_deref()
            .is_some_and(Path::is_dir)
    }

    fn car_path(&self, name: &str) -> Result<PathBuf, RepositoryError> {
        if name.trim().is_empty() || name.contains(INVALID_NAME_CHARS) {
            return Err(RepositoryError::InvalidCarName(name.to_string()));
        }
        let directory = self
            .config
            .cars
            .directory
            .as_deref()
            .ok_or(RepositoryError::DirectoryNotSet)?;
        Ok(directory.join(format!("{name}{}", self.config.cars.extension)))
    }

    /// 配置变更后的持久化。失败只警告，不打断命令。
    fn persist_config(&self) {
        let Some(path) = self.config_path.as_deref() else {
            return;
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(err) = fs::create_dir_all(parent) {
                    warn!(path = %path.display(), error = %err, "创建配置目录失败");
                    return;
                }
            }
        }
        match self.config.save(path) {
            Ok(()) => debug!(path = %path.display(), "配置已保存"),
            Err(err) => warn!(path = %path.display(), error = %err, "保存配置失败"),
        }
    }
}

impl CarRepository for CarStore {
    fn load_car(&self, name: &str) -> Result<Option<Car>, RepositoryError> {
        let path = self.car_path(name)?;
        debug!(path = %path.display(), "加载车辆");
        self.facade
            .load(&path)
            .map_err(|err| RepositoryError::Storage(err.to_string()))
    }

    fn save_car(&self, name: &str, car: &Car) -> Result<PathBuf, RepositoryError> {
        let path = self.car_path(name)?;
        debug!(path = %path.display(), "保存车辆");
        self.facade
            .save(car, &path)
            .map_err(|err| RepositoryError::Storage(err.to_string()))?;
        Ok(path)
    }

    fn render_car(&self, car: &Car) -> String {
        encode(car)
    }

    fn directory(&self) -> Option<PathBuf> {
        self.config.cars.directory.clone()
    }

    fn set_directory(&mut self, path: &Path) -> Result<PathBuf, RepositoryError> {
        if !path.is_dir() {
            return Err(RepositoryError::DirectoryNotFound(path.to_path_buf()));
        }
        self.config.cars.directory = Some(path.to_path_buf());
        self.persist_config();
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfmrad_core::car::{Color, PolyGroup, Polygon};
    use nfmrad_core::geometry::Vertex;

    fn sample_car() -> Car {
        let mut car = Car::new();
        let mut group = PolyGroup::new("Body");
        let mut polygon = Polygon::new();
        polygon.color = Color::new(10, 20, 30);
        polygon.vertices.push(Vertex::new(0, 0, 0));
        polygon.vertices.push(Vertex::new(1, 0, 0));
        polygon.vertices.push(Vertex::new(0, 1, 0));
        group.add_polygon(polygon);
        car.poly_groups.push(group);
        car
    }

    #[test]
    fn load_without_directory_fails() {
        let store = CarStore::new(AppConfig::default(), None);
        let err = store.load_car("anything").expect_err("should fail");
        assert!(matches!(err, RepositoryError::DirectoryNotSet));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let store = CarStore::new(AppConfig::default(), None);
        for name in ["", "   ", "a/b", "a\\b", "a:b", "a*b"] {
            let err = store.load_car(name).expect_err("should fail");
            assert!(matches!(err, RepositoryError::InvalidCarName(_)), "{name}");
        }
    }

    #[test]
    fn set_directory_requires_existing_path() {
        let mut store = CarStore::new(AppConfig::default(), None);
        let err = store
            .set_directory(Path::new("/definitely/not/here"))
            .expect_err("should fail");
        assert!(matches!(err, RepositoryError::DirectoryNotFound(_)));
    }

    #[test]
    fn save_and_load_round_trip_through_directory() {
        let dir = tempfile::tempdir().expect("创建临时目录失败");
        let mut store = CarStore::new(AppConfig::default(), None);
        store.set_directory(dir.path()).expect("设置目录失败");
        assert!(store.has_usable_directory());

        let saved_path = store.save_car("proto", &sample_car()).expect("保存失败");
        assert!(saved_path.ends_with("proto.rad"));
        assert!(saved_path.exists());

        let loaded = store
            .load_car("proto")
            .expect("加载失败")
            .expect("不应为空");
        assert_eq!(loaded.poly_groups.len(), 1);
        assert_eq!(loaded.poly_groups[0].name, "Body");
    }

    #[test]
    fn set_directory_persists_config() {
        let dir = tempfile::tempdir().expect("创建临时目录失败");
        let config_path = dir.path().join("config").join("default.toml");
        let mut store = CarStore::new(AppConfig::default(), Some(config_path.clone()));
        store.set_directory(dir.path()).expect("设置目录失败");

        let reloaded = AppConfig::from_file(&config_path).expect("重新读取配置失败");
        assert_eq!(reloaded.cars.directory.as_deref(), Some(dir.path()));
    }
}
